//! Request/response contract and the pipeline entry point
//!
//! A request is validated before anything touches the mailbox. The flow is
//! fetch (or take the supplied messages), ensure labels when requested, run
//! the batch processor, then summarise.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::GmailClient;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::label_manager::{LabelManager, LabelMapping};
use crate::models::{Category, EmailMessage, ModelChoice, PerMessageOutcome, Priority};
use crate::orchestrator::ClassificationOrchestrator;
use crate::processor::{BatchOptions, BatchProcessor, BatchProgress, BatchRunState};
use crate::scanner::{EmailScanner, FetchedPage};

const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    /// Accepted for compatibility; token refresh is the caller's job
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub max_emails: Option<u32>,
    #[serde(default)]
    pub apply_labels: Option<bool>,
    #[serde(default)]
    pub skip_classified: Option<bool>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub ai_model: Option<String>,
    /// Pre-fetched messages; bypasses the mailbox fetch
    #[serde(default)]
    pub emails_to_process: Option<Vec<EmailMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResponse {
    pub success: bool,
    pub message: String,
    pub result: Option<RunResult>,
    pub next_page_token: Option<String>,
    pub verification: Option<Verification>,
    pub summary: Option<RunSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub total_processed: usize,
    pub total_classified: usize,
    pub labels_applied: usize,
    pub errors: usize,
    pub progress: u8,
    pub results: Vec<PerMessageOutcome>,
    pub label_mapping: Option<LabelMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub total_attempted: usize,
    pub successfully_applied: usize,
    pub failed_to_apply: usize,
    pub labels_created: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_processed: usize,
    pub classified: usize,
    pub prospects: usize,
    pub high_priority: usize,
    pub labels_applied: usize,
    pub errors: usize,
    pub skipped_already_classified: usize,
    pub gmail_labels_created: usize,
}

impl ClassifyResponse {
    /// Response body for a request that failed as a whole
    pub fn failure(error: &GmailError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            result: None,
            next_page_token: None,
            verification: None,
            summary: None,
            error: Some(error.to_string()),
        }
    }
}

/// Request parameters after defaults and clamping
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub access_token: String,
    pub max_emails: u32,
    pub apply_labels: bool,
    pub skip_classified: bool,
    pub query: String,
    pub page_token: Option<String>,
    pub batch_size: usize,
    pub model: ModelChoice,
}

impl ClassifyRequest {
    /// Validate and apply configured defaults. Fails on a missing access token.
    pub fn resolve(&self, config: &Config) -> Result<ResolvedRequest> {
        let access_token = self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GmailError::InvalidRequest("accessToken is required".to_string()))?
            .to_string();

        let model = match self.ai_model.as_deref() {
            Some(name) if !name.trim().is_empty() => name.parse()?,
            _ => ModelChoice::Auto,
        };

        let limit = config.pipeline.max_emails_limit.max(1);
        let max_emails = self
            .max_emails
            .unwrap_or(config.pipeline.default_max_emails)
            .clamp(1, limit);

        let batch_size = self
            .batch_size
            .unwrap_or(config.pipeline.default_batch_size)
            .clamp(1, MAX_BATCH_SIZE);

        Ok(ResolvedRequest {
            access_token,
            max_emails,
            apply_labels: self.apply_labels.unwrap_or(false),
            skip_classified: self.skip_classified.unwrap_or(config.pipeline.skip_classified),
            query: self.query.clone().unwrap_or_default(),
            page_token: self.page_token.clone().filter(|t| !t.is_empty()),
            batch_size,
            model,
        })
    }
}

/// Counts derived from the per-message outcomes
pub fn summarize(state: &BatchRunState, labels_created: usize) -> RunSummary {
    let settled = state.results.iter().filter(|r| r.error.is_none());

    let mut prospects = 0;
    let mut high_priority = 0;
    for outcome in settled {
        let c = &outcome.classification;
        let prospect = c.category == Category::JobOpportunities
            || (c.category == Category::Work && c.needs_follow_up);
        if prospect && !outcome.already_classified {
            prospects += 1;
        }
        if c.priority == Priority::High {
            high_priority += 1;
        }
    }

    RunSummary {
        total_processed: state.total_processed,
        classified: state.total_classified,
        prospects,
        high_priority,
        labels_applied: state.labels_applied,
        errors: state.errors,
        skipped_already_classified: state.skipped_already_classified,
        gmail_labels_created: labels_created,
    }
}

fn summary_message(state: &BatchRunState) -> String {
    format!(
        "Processed {} emails: {} classified, {} labels applied, {} skipped, {} errors",
        state.total_processed,
        state.total_classified,
        state.labels_applied,
        state.skipped_already_classified,
        state.errors
    )
}

/// The classification pipeline behind the request/response contract
pub struct Pipeline {
    config: Config,
    orchestrator: Arc<ClassificationOrchestrator>,
}

impl Pipeline {
    pub fn new(config: Config, orchestrator: Arc<ClassificationOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle one request.
    ///
    /// `connect` builds the mailbox client from the validated access token and
    /// is only called once the request has passed validation. Errors returned
    /// here abort the whole run; per-message failures are reported inside the
    /// response instead.
    pub async fn handle_request<F>(
        &self,
        request: ClassifyRequest,
        connect: F,
        on_batch: Option<&(dyn Fn(&BatchProgress) + Send + Sync)>,
    ) -> Result<ClassifyResponse>
    where
        F: FnOnce(&str) -> Result<Arc<dyn GmailClient>>,
    {
        let resolved = request.resolve(&self.config)?;
        if request.refresh_token.is_some() {
            debug!("Ignoring refresh token; access token is used as-is");
        }

        let client = connect(&resolved.access_token)?;

        let page = match request.emails_to_process {
            Some(messages) => {
                info!("Processing {} supplied messages", messages.len());
                FetchedPage {
                    messages,
                    ..Default::default()
                }
            }
            None => {
                EmailScanner::new(Arc::clone(&client))
                    .with_concurrency(self.config.client.max_concurrent_requests)
                    .fetch_page(&resolved.query, resolved.page_token.clone(), resolved.max_emails)
                    .await?
            }
        };
        let FetchedPage {
            messages,
            failed,
            next_page_token,
        } = page;

        let (label_manager, ensured) = if resolved.apply_labels {
            let manager = Arc::new(LabelManager::new(
                Arc::clone(&client),
                self.config.labels.prefix.clone(),
            ));
            let ensured = manager.ensure_labels().await?;
            (Some(manager), Some(ensured))
        } else {
            (None, None)
        };

        let processor = BatchProcessor::new(
            Arc::clone(&self.orchestrator),
            label_manager,
            self.config.labels.classified_prefixes(),
        );
        let options = BatchOptions {
            batch_size: resolved.batch_size,
            skip_classified: resolved.skip_classified,
            apply_labels: resolved.apply_labels,
            model: resolved.model,
        };
        let mapping: Option<&LabelMapping> = ensured.as_ref().map(|e| &e.mapping);

        let mut state = processor.run(&messages, &options, mapping, on_batch).await;
        for (message_id, error) in &failed {
            state.record_unfetched(message_id, error);
        }

        let labels_created = ensured.as_ref().map_or(0, |e| e.created.len());
        let verification = resolved.apply_labels.then(|| Verification {
            total_attempted: state.labels_attempted,
            successfully_applied: state.labels_applied,
            failed_to_apply: state.labels_failed,
            labels_created,
        });
        let summary = summarize(&state, labels_created);
        let message = summary_message(&state);

        let label_mapping = ensured.map(|e| e.mapping);

        Ok(ClassifyResponse {
            success: true,
            message,
            result: Some(RunResult {
                total_processed: state.total_processed,
                total_classified: state.total_classified,
                labels_applied: state.labels_applied,
                errors: state.errors,
                progress: state.progress,
                results: state.results,
                label_mapping,
            }),
            next_page_token,
            verification,
            summary: Some(summary),
            error: None,
        })
    }
}
