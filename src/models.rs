use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::GmailError;

/// A mailbox message as seen by the pipeline. Read-only once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "from")]
    pub sender: String,
    #[serde(default, alias = "snippet", alias = "bodyOrSnippet")]
    pub body: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "labels", alias = "labelIds")]
    pub existing_labels: BTreeSet<String>,
}

impl EmailMessage {
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id.clone(),
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// The nine canonical business categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Personal,
    Work,
    #[serde(rename = "Spam/Promotions")]
    SpamPromotions,
    Social,
    #[serde(rename = "Notifications/Updates")]
    NotificationsUpdates,
    Finance,
    #[serde(rename = "Job Opportunities")]
    JobOpportunities,
    #[serde(rename = "Important/Follow Up")]
    ImportantFollowUp,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Personal,
        Category::Work,
        Category::SpamPromotions,
        Category::Social,
        Category::NotificationsUpdates,
        Category::Finance,
        Category::JobOpportunities,
        Category::ImportantFollowUp,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Personal => "Personal",
            Category::Work => "Work",
            Category::SpamPromotions => "Spam/Promotions",
            Category::Social => "Social",
            Category::NotificationsUpdates => "Notifications/Updates",
            Category::Finance => "Finance",
            Category::JobOpportunities => "Job Opportunities",
            Category::ImportantFollowUp => "Important/Follow Up",
            Category::Other => "Other",
        }
    }

    /// Category name as it appears in a label path segment ("Spam/Promotions" -> "Spam-Promotions")
    pub fn label_segment(&self) -> String {
        self.as_str().replace('/', "-")
    }

    /// Case-insensitive lookup by canonical name
    pub fn from_name(name: &str) -> Option<Category> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup by label path segment
    pub fn from_label_segment(segment: &str) -> Option<Category> {
        let segment = segment.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label_segment().eq_ignore_ascii_case(segment))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Deterministic ranking from category and urgency.
    ///
    /// High: Important/Follow Up, urgent Finance or Work.
    /// Medium: Job Opportunities, normal Work, urgent Personal.
    /// Low: everything else.
    ///
    /// Non-urgent Finance is ranked Medium as an extension; the base ranking
    /// leaves it unranked.
    pub fn derive(category: Category, urgent: bool) -> Priority {
        match (category, urgent) {
            (Category::ImportantFollowUp, _) => Priority::High,
            (Category::Finance | Category::Work, true) => Priority::High,
            (Category::JobOpportunities, _)
            | (Category::Finance, false)
            | (Category::Work, false)
            | (Category::Personal, true) => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn parse(value: &str) -> Option<Priority> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" | "urgent" => Some(Priority::High),
            _ => None,
        }
    }
}

/// Which classifier produced a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderUsed {
    Primary,
    Secondary,
    Heuristic,
    /// Already classified on a previous run; no classifier was called
    Cached,
    /// Classification failed and a placeholder result was recorded
    None,
}

/// Classifier selection requested by the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    #[default]
    Auto,
    Primary,
    Secondary,
}

impl FromStr for ModelChoice {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ModelChoice::Auto),
            "primary" => Ok(ModelChoice::Primary),
            "secondary" => Ok(ModelChoice::Secondary),
            other => Err(GmailError::InvalidRequest(format!(
                "Invalid aiModel '{}'. Must be 'auto', 'primary', or 'secondary'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: f32,
    pub sentiment: f32,
    pub priority: Priority,
    pub needs_follow_up: bool,
    pub reasoning: String,
    pub provider_used: ProviderUsed,
}

impl ClassificationResult {
    /// Clamp confidence to [0, 1] and sentiment to [-1, 1]; NaN becomes the neutral value
    pub fn clamped(mut self) -> Self {
        self.confidence = clamp_or(self.confidence, 0.0, 1.0, 0.0);
        self.sentiment = clamp_or(self.sentiment, -1.0, 1.0, 0.0);
        self
    }

    /// Placeholder recorded when a message could not be classified
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            category: Category::Other,
            confidence: 0.1,
            sentiment: 0.0,
            priority: Priority::Low,
            needs_follow_up: false,
            reasoning: reason.into(),
            provider_used: ProviderUsed::None,
        }
    }

    /// Synthetic result for a message that already carries a classifier label
    pub fn cached(category: Category, label: &str) -> Self {
        Self {
            category,
            confidence: 1.0,
            sentiment: 0.0,
            priority: Priority::derive(category, false),
            needs_follow_up: false,
            reasoning: format!("Already classified (label '{}')", label),
            provider_used: ProviderUsed::Cached,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Final record for one input message. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerMessageOutcome {
    pub message: MessageSummary,
    pub classification: ClassificationResult,
    pub applied_label: Option<String>,
    pub label_apply_success: bool,
    pub already_classified: bool,
    pub error: Option<String>,
}
