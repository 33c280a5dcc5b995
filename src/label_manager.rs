//! Label reconciliation between classification categories and remote Gmail labels
//!
//! [`LabelManager::ensure_labels`] runs once per pipeline run and produces a
//! [`LabelMapping`] that stays read-only afterwards. Per-message application
//! looks up the canonical label name, falls back to [`closest_label_match`]
//! when the mapping has drifted, applies the label and re-reads the message
//! to verify it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::models::Category;

/// Canonical label for a category: `<prefix>/<category with '/' replaced by '-'>`
pub fn canonical_label_name(prefix: &str, category: Category) -> String {
    format!("{}/{}", prefix, category.label_segment())
}

/// Remote label name (as spelled remotely) -> label ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping {
    labels: BTreeMap<String, String>,
}

impl LabelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: impl Into<String>) {
        self.labels.insert(name.into(), id.into());
    }

    /// Exact, case-sensitive lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Label names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(String, String)> for LabelMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

/// Result of the one-time label-existence pass
#[derive(Debug, Clone, Default)]
pub struct EnsuredLabels {
    pub mapping: LabelMapping,
    /// Names of labels created by this pass, parent included
    pub created: Vec<String>,
}

/// Outcome of applying a category label to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelApplyOutcome {
    /// Label actually applied; differs from the canonical name after substitution
    pub applied_label: Option<String>,
    pub success: bool,
    /// `None` when the verification read itself failed
    pub verified: Option<bool>,
    pub error: Option<String>,
}

impl LabelApplyOutcome {
    fn failed(error: GmailError) -> Self {
        Self {
            applied_label: None,
            success: false,
            verified: None,
            error: Some(error.to_string()),
        }
    }
}

/// Find the best available label for a category name.
///
/// Case-insensitive. First pass: a name containing the category (also tried
/// with '/' as '-'). Second pass: a name whose last path segment is contained
/// in the category. Names are scanned in sorted order and the first hit wins.
pub fn closest_label_match<'a>(
    requested: &str,
    available: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let requested = requested.trim().to_lowercase();
    if requested.is_empty() {
        return None;
    }
    let dashed = requested.replace('/', "-");

    let mut candidates: Vec<&str> = available.into_iter().collect();
    candidates.sort_unstable();

    let containing = candidates.iter().find(|name| {
        let name = name.to_lowercase();
        name.contains(&requested) || name.contains(&dashed)
    });
    if let Some(name) = containing {
        return Some(name.to_string());
    }

    candidates
        .iter()
        .find(|name| {
            let leaf = name.rsplit('/').next().unwrap_or_default().trim().to_lowercase();
            !leaf.is_empty() && (requested.contains(&leaf) || dashed.contains(&leaf))
        })
        .map(|name| name.to_string())
}

pub struct LabelManager {
    client: Arc<dyn GmailClient>,
    label_prefix: String,
}

impl LabelManager {
    pub fn new(client: Arc<dyn GmailClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            label_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.label_prefix
    }

    pub fn canonical_name(&self, category: Category) -> String {
        canonical_label_name(&self.label_prefix, category)
    }

    /// Make sure the parent label and all nine category labels exist.
    ///
    /// Existing labels are matched case-insensitively and kept under their
    /// remote spelling. Any failure here is fatal to the run.
    pub async fn ensure_labels(&self) -> Result<EnsuredLabels> {
        let existing = self
            .client
            .list_labels()
            .await
            .map_err(|e| GmailError::LabelCreationError(format!("Failed to list labels: {}", e)))?;

        // lowercase name -> (remote name, id)
        let existing: HashMap<String, (String, String)> = existing
            .into_iter()
            .map(|label| (label.name.to_lowercase(), (label.name, label.id)))
            .collect();
        debug!("Loaded {} existing labels", existing.len());

        let mut ensured = EnsuredLabels::default();

        if !existing.contains_key(&self.label_prefix.to_lowercase()) {
            self.create(&self.label_prefix).await?;
            ensured.created.push(self.label_prefix.clone());
        }

        for category in Category::ALL {
            let name = self.canonical_name(category);

            match existing.get(&name.to_lowercase()) {
                Some((remote_name, id)) => {
                    if remote_name != &name {
                        debug!("Reusing label '{}' for '{}'", remote_name, name);
                    }
                    ensured.mapping.insert(remote_name.clone(), id.clone());
                }
                None => {
                    let id = self.create(&name).await?;
                    ensured.mapping.insert(name.clone(), id);
                    ensured.created.push(name);
                }
            }
        }

        info!(
            "Label mapping ready: {} labels, {} created",
            ensured.mapping.len(),
            ensured.created.len()
        );
        Ok(ensured)
    }

    async fn create(&self, name: &str) -> Result<String> {
        info!("Creating label: {}", name);
        self.client.create_label(name).await.map_err(|e| {
            GmailError::LabelCreationError(format!("Failed to create label '{}': {}", name, e))
        })
    }

    /// Apply the label for `category` to a message and verify it landed.
    ///
    /// When the canonical label is missing from the mapping, or applying it
    /// fails, the closest remaining match is tried once.
    pub async fn apply_category_label(
        &self,
        message_id: &str,
        category: Category,
        mapping: &LabelMapping,
    ) -> LabelApplyOutcome {
        let canonical = self.canonical_name(category);

        let mut last_error = match mapping.get(&canonical) {
            Some(label_id) => match self.apply_and_verify(message_id, &canonical, label_id).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    warn!("Applying '{}' to {} failed: {}", canonical, message_id, e);
                    Some(e)
                }
            },
            None => None,
        };

        let substitute = closest_label_match(
            category.as_str(),
            mapping.names().filter(|name| *name != canonical),
        );

        let Some(substitute) = substitute else {
            let error = last_error.take().unwrap_or_else(|| {
                GmailError::LabelApplicationError(format!(
                    "No label available for category '{}'",
                    category
                ))
            });
            return LabelApplyOutcome::failed(error);
        };

        let Some(label_id) = mapping.get(&substitute) else {
            return LabelApplyOutcome::failed(GmailError::LabelApplicationError(format!(
                "Label '{}' has no ID",
                substitute
            )));
        };

        info!(
            "Label '{}' unavailable for {}, substituting '{}'",
            canonical, message_id, substitute
        );
        match self.apply_and_verify(message_id, &substitute, label_id).await {
            Ok(outcome) => outcome,
            Err(e) => LabelApplyOutcome::failed(e),
        }
    }

    async fn apply_and_verify(
        &self,
        message_id: &str,
        label_name: &str,
        label_id: &str,
    ) -> Result<LabelApplyOutcome> {
        self.client
            .apply_label(message_id, label_id)
            .await
            .map_err(|e| {
                GmailError::LabelApplicationError(format!(
                    "Failed to apply '{}' to {}: {}",
                    label_name, message_id, e
                ))
            })?;

        let verified = match self.client.get_message_label_ids(message_id).await {
            Ok(label_ids) => {
                let present = label_ids.iter().any(|id| id == label_id);
                if !present {
                    warn!(
                        "Label '{}' not yet visible on message {} after apply",
                        label_name, message_id
                    );
                }
                Some(present)
            }
            Err(e) => {
                warn!("Could not verify labels on {}: {}", message_id, e);
                None
            }
        };

        Ok(LabelApplyOutcome {
            applied_label: Some(label_name.to_string()),
            success: true,
            verified,
            error: None,
        })
    }
}
