//! Already-classified detection
//!
//! A message counts as previously classified when one of its label names
//! starts with a configured classifier prefix. Nothing is stored between
//! runs; the decision is re-derived from the labels every time.

use std::collections::BTreeSet;

use crate::models::{Category, ClassificationResult};

#[derive(Debug, Clone)]
pub struct SkipDetector {
    enabled: bool,
    /// Lowercased prefixes
    prefixes: Vec<String>,
}

impl SkipDetector {
    pub fn new(enabled: bool, prefixes: &[String]) -> Self {
        Self {
            enabled,
            prefixes: prefixes.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// First existing label that marks the message as classified, if skipping is enabled
    pub fn matching_label<'a>(&self, existing_labels: &'a BTreeSet<String>) -> Option<&'a str> {
        if !self.enabled {
            return None;
        }

        existing_labels
            .iter()
            .find(|label| {
                let lower = label.to_lowercase();
                self.prefixes.iter().any(|prefix| lower.starts_with(prefix))
            })
            .map(String::as_str)
    }

    /// Synthetic result for a skipped message, recovering the category from the label leaf
    pub fn cached_result(label: &str) -> ClassificationResult {
        let leaf = label.rsplit('/').next().unwrap_or(label);
        let category = Category::from_label_segment(leaf)
            .or_else(|| Category::from_name(leaf))
            .unwrap_or(Category::Other);

        ClassificationResult::cached(category, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderUsed;

    fn labels(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn detector(enabled: bool) -> SkipDetector {
        SkipDetector::new(enabled, &["Classifier/".to_string()])
    }

    #[test]
    fn test_skips_classifier_label() {
        let existing = labels(&["INBOX", "Classifier/Work"]);
        let detector = detector(true);

        assert_eq!(detector.matching_label(&existing), Some("Classifier/Work"));
    }

    #[test]
    fn test_disabled_never_skips() {
        let existing = labels(&["Classifier/Work"]);
        assert_eq!(detector(false).matching_label(&existing), None);
    }

    #[test]
    fn test_prefix_match_is_case_insensitive() {
        assert_eq!(
            detector(true).matching_label(&labels(&["classifier/finance"])),
            Some("classifier/finance")
        );
    }

    #[test]
    fn test_unrelated_labels_do_not_skip() {
        let existing = labels(&["INBOX", "UNREAD", "Classifiers", "Work"]);
        assert!(detector(true).matching_label(&existing).is_none());
        assert!(detector(true).matching_label(&BTreeSet::new()).is_none());
    }

    #[test]
    fn test_cached_result_recovers_category() {
        let result = SkipDetector::cached_result("Classifier/Work");
        assert_eq!(result.category, Category::Work);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.provider_used, ProviderUsed::Cached);

        let result = SkipDetector::cached_result("Classifier/Spam-Promotions");
        assert_eq!(result.category, Category::SpamPromotions);

        let result = SkipDetector::cached_result("Classifier/Legacy");
        assert_eq!(result.category, Category::Other);
        assert_eq!(result.confidence, 1.0);
    }
}
