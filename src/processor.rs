//! Batch processing loop
//!
//! Messages are split into consecutive chunks. Every message in a chunk runs
//! skip detection, classification and label application concurrently; the
//! next chunk starts only after the whole chunk has settled. Per-message
//! units never touch the shared counters. The coordinator folds each settled
//! chunk into [`BatchRunState`], so counters only grow and progress never
//! goes backwards.

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::GmailError;
use crate::label_manager::{LabelManager, LabelMapping};
use crate::models::{ClassificationResult, EmailMessage, MessageSummary, ModelChoice, PerMessageOutcome};
use crate::orchestrator::ClassificationOrchestrator;
use crate::skip_detector::SkipDetector;

/// Per-run options
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub skip_classified: bool,
    pub apply_labels: bool,
    pub model: ModelChoice,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            skip_classified: true,
            apply_labels: false,
            model: ModelChoice::Auto,
        }
    }
}

/// Snapshot taken after a batch settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_index: usize,
    pub size: usize,
    pub processed: usize,
    pub total: usize,
    pub progress: u8,
}

/// Aggregate state of one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunState {
    pub total_processed: usize,
    pub total_classified: usize,
    pub labels_applied: usize,
    pub errors: usize,
    pub skipped_already_classified: usize,
    pub labels_attempted: usize,
    pub labels_failed: usize,
    pub progress: u8,
    pub batches: Vec<BatchProgress>,
    pub results: Vec<PerMessageOutcome>,
}

impl BatchRunState {
    fn record(&mut self, unit: UnitOutcome) {
        self.total_processed += 1;
        if unit.outcome.already_classified {
            self.skipped_already_classified += 1;
        }
        if unit.classified {
            self.total_classified += 1;
        }
        if unit.label_attempted {
            self.labels_attempted += 1;
            if unit.outcome.label_apply_success {
                self.labels_applied += 1;
            } else {
                self.labels_failed += 1;
            }
        }
        if unit.outcome.error.is_some() {
            self.errors += 1;
        }
        self.results.push(unit.outcome);
    }

    /// Record a listed message that could not be loaded.
    ///
    /// It gets the same terminal outcome as any other per-message failure
    /// and is appended after the processed messages.
    pub fn record_unfetched(&mut self, message_id: &str, error: &GmailError) {
        let summary = MessageSummary {
            id: message_id.to_string(),
            subject: String::new(),
            sender: String::new(),
            timestamp: None,
        };
        let error = GmailError::MessageProcessing(format!("Failed to fetch message: {}", error));
        self.record(UnitOutcome::failed(summary, error));
    }
}

/// Integer percentage, rounded half away from zero
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

struct UnitOutcome {
    outcome: PerMessageOutcome,
    classified: bool,
    label_attempted: bool,
}

impl UnitOutcome {
    fn failed(message: MessageSummary, error: GmailError) -> Self {
        let error = error.to_string();
        Self {
            outcome: PerMessageOutcome {
                message,
                classification: ClassificationResult::failed(error.clone()),
                applied_label: None,
                label_apply_success: false,
                already_classified: false,
                error: Some(error),
            },
            classified: false,
            label_attempted: false,
        }
    }
}

pub struct BatchProcessor {
    orchestrator: Arc<ClassificationOrchestrator>,
    label_manager: Option<Arc<LabelManager>>,
    skip_prefixes: Vec<String>,
}

impl BatchProcessor {
    pub fn new(
        orchestrator: Arc<ClassificationOrchestrator>,
        label_manager: Option<Arc<LabelManager>>,
        skip_prefixes: Vec<String>,
    ) -> Self {
        Self {
            orchestrator,
            label_manager,
            skip_prefixes,
        }
    }

    /// Run every message through the pipeline, batch by batch.
    ///
    /// Labels are applied only when `options.apply_labels` is set and a
    /// mapping is supplied. `on_batch` is called after each batch settles.
    pub async fn run(
        &self,
        messages: &[EmailMessage],
        options: &BatchOptions,
        mapping: Option<&LabelMapping>,
        on_batch: Option<&(dyn Fn(&BatchProgress) + Send + Sync)>,
    ) -> BatchRunState {
        let total = messages.len();
        let batch_size = options.batch_size.max(1);
        let skip_detector = SkipDetector::new(options.skip_classified, &self.skip_prefixes);
        let mapping = if options.apply_labels { mapping } else { None };

        if options.apply_labels && mapping.is_none() {
            warn!("Label application requested without a label mapping; labels will not be applied");
        }

        let mut state = BatchRunState {
            results: Vec::with_capacity(total),
            ..Default::default()
        };

        if total == 0 {
            state.progress = 100;
            return state;
        }

        info!(
            "Processing {} messages in batches of {} (model: {:?})",
            total, batch_size, options.model
        );

        for (batch_index, chunk) in messages.chunks(batch_size).enumerate() {
            let units = chunk.iter().map(|message| {
                AssertUnwindSafe(self.process_message(message, &skip_detector, options.model, mapping))
                    .catch_unwind()
                    .map(move |result| {
                        result.unwrap_or_else(|_| {
                            UnitOutcome::failed(
                                message.summary(),
                                GmailError::MessageProcessing(format!(
                                    "Unexpected failure while processing {}",
                                    message.id
                                )),
                            )
                        })
                    })
            });

            // join_all yields results in input order
            for unit in join_all(units).await {
                state.record(unit);
            }

            state.progress = progress_percent(state.total_processed, total);
            let snapshot = BatchProgress {
                batch_index,
                size: chunk.len(),
                processed: state.total_processed,
                total,
                progress: state.progress,
            };
            debug!(
                "Batch {} settled: {}/{} ({}%)",
                batch_index + 1,
                snapshot.processed,
                total,
                snapshot.progress
            );
            state.batches.push(snapshot);

            if let Some(callback) = on_batch {
                callback(&snapshot);
            }
        }

        info!(
            "Run complete: {} processed, {} classified, {} labels applied, {} skipped, {} errors",
            state.total_processed,
            state.total_classified,
            state.labels_applied,
            state.skipped_already_classified,
            state.errors
        );
        state
    }

    async fn process_message(
        &self,
        message: &EmailMessage,
        skip_detector: &SkipDetector,
        model: ModelChoice,
        mapping: Option<&LabelMapping>,
    ) -> UnitOutcome {
        if message.id.trim().is_empty() {
            return UnitOutcome::failed(
                message.summary(),
                GmailError::MessageProcessing("Message has no ID".to_string()),
            );
        }

        if let Some(label) = skip_detector.matching_label(&message.existing_labels) {
            debug!("Skipping {}: already labelled '{}'", message.id, label);
            return UnitOutcome {
                outcome: PerMessageOutcome {
                    message: message.summary(),
                    classification: SkipDetector::cached_result(label),
                    applied_label: None,
                    label_apply_success: false,
                    already_classified: true,
                    error: None,
                },
                classified: false,
                label_attempted: false,
            };
        }

        let classification = match self
            .orchestrator
            .classify(&message.subject, &message.body, &message.sender, model)
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Classification failed for {}: {}", message.id, e);
                return UnitOutcome::failed(message.summary(), e);
            }
        };

        let (applied_label, label_apply_success, error, label_attempted) =
            match (mapping, &self.label_manager) {
                (Some(mapping), Some(manager)) => {
                    let applied = manager
                        .apply_category_label(&message.id, classification.category, mapping)
                        .await;
                    (applied.applied_label, applied.success, applied.error, true)
                }
                _ => (None, false, None, false),
            };

        UnitOutcome {
            outcome: PerMessageOutcome {
                message: message.summary(),
                classification,
                applied_label,
                label_apply_success,
                already_classified: false,
                error,
            },
            classified: true,
            label_attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockGmailClient;
    use crate::models::{Category, ProviderUsed};
    use crate::providers::{ClassificationProvider, RawClassification};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn message(id: &str, subject: &str, labels: &[&str]) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: "someone@example.com".to_string(),
            body: String::new(),
            timestamp: None,
            existing_labels: labels.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn heuristic_processor(label_manager: Option<Arc<LabelManager>>) -> BatchProcessor {
        BatchProcessor::new(
            Arc::new(ClassificationOrchestrator::heuristic_only()),
            label_manager,
            vec!["Classifier/".to_string()],
        )
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 25), 0);
        assert_eq!(progress_percent(10, 25), 40);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(25, 25), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[tokio::test]
    async fn test_twenty_five_messages_in_three_batches() {
        let messages: Vec<EmailMessage> = (0..25)
            .map(|i| message(&format!("m{}", i), "Team meeting", &[]))
            .collect();
        let options = BatchOptions {
            batch_size: 10,
            apply_labels: false,
            ..Default::default()
        };

        let seen = Mutex::new(Vec::new());
        let callback = |p: &BatchProgress| seen.lock().unwrap().push(p.progress);

        let state = heuristic_processor(None)
            .run(&messages, &options, None, Some(&callback))
            .await;

        let sizes: Vec<usize> = state.batches.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(state.total_processed, 25);
        assert_eq!(state.total_classified, 25);
        assert_eq!(state.labels_applied, 0);
        assert_eq!(state.errors, 0);
        assert_eq!(state.progress, 100);
        assert_eq!(*seen.lock().unwrap(), vec![40, 80, 100]);
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let messages: Vec<EmailMessage> = (0..7)
            .map(|i| message(&format!("m{}", i), "hello", &[]))
            .collect();
        let options = BatchOptions {
            batch_size: 3,
            ..Default::default()
        };

        let state = heuristic_processor(None).run(&messages, &options, None, None).await;

        let ids: Vec<&str> = state.results.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4", "m5", "m6"]);

        let progress: Vec<u8> = state.batches.iter().map(|b| b.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_already_classified_message_makes_no_calls() {
        let mut mock = MockGmailClient::new();
        mock.expect_apply_label().never();
        mock.expect_get_message_label_ids().never();
        let manager = Arc::new(LabelManager::new(Arc::new(mock), "Classifier"));

        let mut mapping = LabelMapping::new();
        mapping.insert("Classifier/Work", "Label_work");

        let messages = vec![message("m1", "URGENT", &["INBOX", "Classifier/Work"])];
        let options = BatchOptions {
            apply_labels: true,
            skip_classified: true,
            ..Default::default()
        };

        let state = heuristic_processor(Some(manager))
            .run(&messages, &options, Some(&mapping), None)
            .await;

        let outcome = &state.results[0];
        assert!(outcome.already_classified);
        assert_eq!(outcome.classification.confidence, 1.0);
        assert_eq!(outcome.classification.category, Category::Work);
        assert_eq!(outcome.classification.provider_used, ProviderUsed::Cached);
        assert_eq!(state.skipped_already_classified, 1);
        assert_eq!(state.labels_applied, 0);
        assert_eq!(state.labels_attempted, 0);
    }

    #[tokio::test]
    async fn test_skip_disabled_reclassifies() {
        let messages = vec![message("m1", "URGENT", &["Classifier/Work"])];
        let options = BatchOptions {
            skip_classified: false,
            ..Default::default()
        };

        let state = heuristic_processor(None).run(&messages, &options, None, None).await;

        assert!(!state.results[0].already_classified);
        assert_eq!(state.results[0].classification.category, Category::ImportantFollowUp);
        assert_eq!(state.skipped_already_classified, 0);
    }

    #[tokio::test]
    async fn test_pinned_provider_failure_is_per_message_error() {
        let messages = vec![message("m1", "hello", &[]), message("m2", "world", &[])];
        let options = BatchOptions {
            model: ModelChoice::Primary,
            ..Default::default()
        };

        let state = heuristic_processor(None).run(&messages, &options, None, None).await;

        assert_eq!(state.total_processed, 2);
        assert_eq!(state.errors, 2);
        assert_eq!(state.total_classified, 0);
        for outcome in &state.results {
            assert_eq!(outcome.classification.category, Category::Other);
            assert_eq!(outcome.classification.confidence, 0.1);
            assert_eq!(outcome.classification.provider_used, ProviderUsed::None);
            assert!(outcome.applied_label.is_none());
            assert!(outcome.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_label_application_counts() {
        let mut mock = MockGmailClient::new();
        mock.expect_apply_label().returning(|_, label_id| {
            if label_id == "Label_work" {
                Ok(())
            } else {
                Err(GmailError::Forbidden("denied".to_string()))
            }
        });
        mock.expect_get_message_label_ids()
            .returning(|_| Ok(vec!["Label_work".to_string()]));
        let manager = Arc::new(LabelManager::new(Arc::new(mock), "Classifier"));

        let mut mapping = LabelMapping::new();
        mapping.insert("Classifier/Work", "Label_work");
        mapping.insert("Classifier/Spam-Promotions", "Label_spam");

        let messages = vec![
            message("m1", "project sync", &[]),
            message("m2", "big sale today", &[]),
        ];
        let options = BatchOptions {
            apply_labels: true,
            ..Default::default()
        };

        let state = heuristic_processor(Some(manager))
            .run(&messages, &options, Some(&mapping), None)
            .await;

        assert_eq!(state.total_classified, 2);
        assert_eq!(state.labels_attempted, 2);
        assert_eq!(state.labels_applied, 1);
        assert_eq!(state.labels_failed, 1);
        assert_eq!(state.errors, 1);
        assert_eq!(state.results[0].applied_label.as_deref(), Some("Classifier/Work"));
        assert!(state.results[1].applied_label.is_none());
        assert_eq!(state.results[1].classification.category, Category::SpamPromotions);
    }

    #[tokio::test]
    async fn test_message_without_id_gets_terminal_outcome() {
        let messages = vec![message("", "meeting", &[]), message("m2", "meeting", &[])];

        let state = heuristic_processor(None)
            .run(&messages, &BatchOptions::default(), None, None)
            .await;

        assert_eq!(state.total_processed, 2);
        assert_eq!(state.errors, 1);
        assert_eq!(state.total_classified, 1);
        assert_eq!(state.results[0].classification.confidence, 0.1);
    }

    struct PanickingProvider;

    #[async_trait::async_trait]
    impl ClassificationProvider for PanickingProvider {
        async fn classify(&self, subject: &str, _body: &str, _sender: &str) -> crate::error::Result<RawClassification> {
            if subject.contains("boom") {
                panic!("provider blew up on {}", subject);
            }
            Ok(RawClassification {
                category: "Work".to_string(),
                confidence: Some(0.8),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_message_settles_as_failure() {
        let provider: Arc<dyn ClassificationProvider> = Arc::new(PanickingProvider);
        let orchestrator = ClassificationOrchestrator::new(Some(provider), None);
        let processor = BatchProcessor::new(Arc::new(orchestrator), None, vec!["Classifier/".to_string()]);
        let messages = vec![message("a", "boom", &[]), message("b", "status", &[])];

        let state = processor.run(&messages, &BatchOptions::default(), None, None).await;

        assert_eq!(state.total_processed, 2);
        assert_eq!(state.errors, 1);
        assert_eq!(state.total_classified, 1);
        assert_eq!(state.progress, 100);

        let failed = &state.results[0];
        assert_eq!(failed.message.id, "a");
        assert_eq!(failed.classification.category, Category::Other);
        assert_eq!(failed.classification.confidence, 0.1);
        assert_eq!(failed.classification.provider_used, ProviderUsed::None);
        assert!(failed.applied_label.is_none());
        assert!(failed.error.as_deref().unwrap().contains("Unexpected failure"));

        let settled = &state.results[1];
        assert_eq!(settled.classification.category, Category::Work);
        assert_eq!(settled.classification.provider_used, ProviderUsed::Primary);
        assert!(settled.error.is_none());
    }

    #[test]
    fn test_record_unfetched_counts_as_error() {
        let mut state = BatchRunState::default();
        state.record_unfetched(
            "flaky",
            &GmailError::ServerError {
                status: 503,
                message: "backend".to_string(),
            },
        );

        assert_eq!(state.total_processed, 1);
        assert_eq!(state.errors, 1);
        assert_eq!(state.total_classified, 0);

        let outcome = &state.results[0];
        assert_eq!(outcome.message.id, "flaky");
        assert_eq!(outcome.classification.category, Category::Other);
        assert_eq!(outcome.classification.confidence, 0.1);
        assert!(outcome.error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let state = heuristic_processor(None)
            .run(&[], &BatchOptions::default(), None, None)
            .await;

        assert_eq!(state.total_processed, 0);
        assert_eq!(state.progress, 100);
        assert!(state.batches.is_empty());
    }
}
