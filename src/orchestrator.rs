//! Classification fallback chain
//!
//! `auto` walks primary -> secondary -> heuristic, recovering from provider
//! failures locally. An explicitly requested provider is never substituted:
//! its failure is returned to the caller.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::classifier::HeuristicClassifier;
use crate::config::ClassificationConfig;
use crate::error::{GmailError, Result};
use crate::models::{ClassificationResult, ModelChoice, ProviderUsed};
use crate::providers::{normalize, AnthropicClassifier, ClassificationProvider, OpenAiClassifier};

pub struct ClassificationOrchestrator {
    primary: Option<Arc<dyn ClassificationProvider>>,
    secondary: Option<Arc<dyn ClassificationProvider>>,
    heuristic: HeuristicClassifier,
}

impl ClassificationOrchestrator {
    pub fn new(
        primary: Option<Arc<dyn ClassificationProvider>>,
        secondary: Option<Arc<dyn ClassificationProvider>>,
    ) -> Self {
        Self {
            primary,
            secondary,
            heuristic: HeuristicClassifier::new(),
        }
    }

    /// Orchestrator with no AI providers; every result comes from the heuristic classifier
    pub fn heuristic_only() -> Self {
        Self::new(None, None)
    }

    /// Build providers whose API keys are present in the environment
    pub fn from_config(config: &ClassificationConfig) -> Result<Self> {
        let primary = OpenAiClassifier::from_config(&config.primary)?
            .map(|p| Arc::new(p) as Arc<dyn ClassificationProvider>);
        let secondary = AnthropicClassifier::from_config(&config.secondary)?
            .map(|p| Arc::new(p) as Arc<dyn ClassificationProvider>);

        debug!(
            "Classification providers configured: primary={}, secondary={}",
            primary.is_some(),
            secondary.is_some()
        );

        Ok(Self::new(primary, secondary))
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Classify one message.
    ///
    /// With [`ModelChoice::Auto`] this never fails. With a pinned provider, a
    /// missing configuration or a failed call is returned as an error.
    pub async fn classify(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
        choice: ModelChoice,
    ) -> Result<ClassificationResult> {
        match choice {
            ModelChoice::Primary => {
                self.classify_pinned(self.primary.as_ref(), ProviderUsed::Primary, subject, body, sender)
                    .await
            }
            ModelChoice::Secondary => {
                self.classify_pinned(self.secondary.as_ref(), ProviderUsed::Secondary, subject, body, sender)
                    .await
            }
            ModelChoice::Auto => Ok(self.classify_auto(subject, body, sender).await),
        }
    }

    async fn classify_pinned(
        &self,
        provider: Option<&Arc<dyn ClassificationProvider>>,
        tag: ProviderUsed,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<ClassificationResult> {
        let provider = provider.ok_or_else(|| GmailError::ProviderNotConfigured(tag_name(tag).to_string()))?;

        let raw = provider.classify(subject, body, sender).await.map_err(|e| match e {
            err @ GmailError::ProviderError { .. } => err,
            other => GmailError::provider(tag_name(tag), other.to_string()),
        })?;

        Ok(normalize(raw, tag))
    }

    async fn classify_auto(&self, subject: &str, body: &str, sender: &str) -> ClassificationResult {
        let chain = [
            (self.primary.as_ref(), ProviderUsed::Primary),
            (self.secondary.as_ref(), ProviderUsed::Secondary),
        ];

        for (provider, tag) in chain {
            let Some(provider) = provider else {
                continue;
            };

            match provider.classify(subject, body, sender).await {
                Ok(raw) => return normalize(raw, tag),
                Err(e) => {
                    warn!("{} classifier failed, falling back: {}", tag_name(tag), e);
                }
            }
        }

        debug!("Using heuristic classifier");
        self.heuristic.classify(subject, body)
    }
}

fn tag_name(tag: ProviderUsed) -> &'static str {
    match tag {
        ProviderUsed::Primary => "primary",
        ProviderUsed::Secondary => "secondary",
        ProviderUsed::Heuristic => "heuristic",
        ProviderUsed::Cached => "cached",
        ProviderUsed::None => "none",
    }
}
