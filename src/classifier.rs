//! Rule-based fallback classifier
//!
//! Needs no external service, so it is always available and terminates the
//! classification chain. Keyword groups are evaluated in priority order
//! against the concatenated subject and body; the first group that matches
//! decides the category.

use crate::models::{Category, ClassificationResult, Priority, ProviderUsed};
use once_cell::sync::Lazy;
use regex::Regex;

struct KeywordRule {
    pattern: Regex,
    category: Category,
    confidence: f32,
    label: &'static str,
}

static RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| {
    vec![
        KeywordRule {
            pattern: Regex::new(r"(?i)(urgent|important)").unwrap(),
            category: Category::ImportantFollowUp,
            confidence: 0.7,
            label: "urgency keyword",
        },
        KeywordRule {
            pattern: Regex::new(r"(?i)(work|project|meeting)").unwrap(),
            category: Category::Work,
            confidence: 0.6,
            label: "work keyword",
        },
        KeywordRule {
            pattern: Regex::new(r"(?i)(promotion|sale|offer)").unwrap(),
            category: Category::SpamPromotions,
            confidence: 0.8,
            label: "promotional keyword",
        },
    ]
});

const FALLTHROUGH_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify from subject and body. Never fails; unmatched text falls through to Other.
    pub fn classify(&self, subject: &str, body: &str) -> ClassificationResult {
        let text = format!("{} {}", subject, body);

        for rule in RULES.iter() {
            if let Some(found) = rule.pattern.find(&text) {
                let urgent = rule.category == Category::ImportantFollowUp;
                return ClassificationResult {
                    category: rule.category,
                    confidence: rule.confidence,
                    sentiment: 0.0,
                    priority: Priority::derive(rule.category, urgent),
                    needs_follow_up: urgent,
                    reasoning: format!(
                        "Heuristic match on {} '{}'",
                        rule.label,
                        found.as_str().to_lowercase()
                    ),
                    provider_used: ProviderUsed::Heuristic,
                }
                .clamped();
            }
        }

        ClassificationResult {
            category: Category::Other,
            confidence: FALLTHROUGH_CONFIDENCE,
            sentiment: 0.0,
            priority: Priority::derive(Category::Other, false),
            needs_follow_up: false,
            reasoning: "No heuristic keyword matched".to_string(),
            provider_used: ProviderUsed::Heuristic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgent_contract() {
        let classifier = HeuristicClassifier::new();
        let result = classifier.classify("URGENT: contract", "please sign asap");

        assert_eq!(result.category, Category::ImportantFollowUp);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.priority, Priority::High);
        assert!(result.needs_follow_up);
        assert_eq!(result.provider_used, ProviderUsed::Heuristic);
    }

    #[test]
    fn test_rule_order() {
        let classifier = HeuristicClassifier::new();

        // urgency outranks work keywords
        let result = classifier.classify("Important project update", "");
        assert_eq!(result.category, Category::ImportantFollowUp);

        let result = classifier.classify("Team meeting notes", "");
        assert_eq!(result.category, Category::Work);
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.priority, Priority::Medium);

        // work outranks promotions
        let result = classifier.classify("Offer for the project", "");
        assert_eq!(result.category, Category::Work);
    }

    #[test]
    fn test_promotions_match_body() {
        let classifier = HeuristicClassifier::new();
        let result = classifier.classify("Hello there", "Our summer SALE ends tonight");

        assert_eq!(result.category, Category::SpamPromotions);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.priority, Priority::Low);
    }

    #[test]
    fn test_empty_input_falls_through() {
        let classifier = HeuristicClassifier::new();
        let result = classifier.classify("", "");

        assert_eq!(result.category, Category::Other);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.sentiment, 0.0);
        assert!(!result.needs_follow_up);
    }
}
