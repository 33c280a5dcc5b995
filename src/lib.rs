//! Gmail Bulk Classifier
//!
//! Classifies mailbox messages into nine fixed business categories and
//! reconciles the result with Gmail labels.
//!
//! # Overview
//!
//! - **Classification**: primary and secondary AI providers with a keyword
//!   heuristic as the final fallback
//! - **Skip detection**: messages already carrying a classifier label are
//!   not classified again, so repeated runs are cheap
//! - **Label reconciliation**: category labels are created once per run,
//!   applied per message, and verified by re-reading the message
//! - **Batch processing**: fixed-size batches run concurrently inside a
//!   batch and sequentially across batches
//! - **Pagination**: one page per request, with a continuation token
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_classifier::api::{ClassifyRequest, Pipeline};
//! use gmail_classifier::client::{GmailClient, ProductionGmailClient};
//! use gmail_classifier::config::Config;
//! use gmail_classifier::orchestrator::ClassificationOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let orchestrator = ClassificationOrchestrator::from_config(&config.classification)?;
//!     let client_config = config.client.clone();
//!     let pipeline = Pipeline::new(config, Arc::new(orchestrator));
//!
//!     let request = ClassifyRequest {
//!         access_token: Some("ya29...".to_string()),
//!         apply_labels: Some(true),
//!         ..Default::default()
//!     };
//!
//!     let response = pipeline
//!         .handle_request(
//!             request,
//!             |token| {
//!                 let client = ProductionGmailClient::connect(token, &client_config)?;
//!                 Ok(Arc::new(client) as Arc<dyn GmailClient>)
//!             },
//!             None,
//!         )
//!         .await?;
//!
//!     println!("{}", response.message);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`api`] - Request/response contract and pipeline entry point
//! - [`auth`] - Gmail hub construction from an access token
//! - [`client`] - Rate-limited Gmail API client with retry logic
//! - [`classifier`] - Keyword heuristic classifier
//! - [`providers`] - AI classification providers
//! - [`orchestrator`] - Classifier fallback chain
//! - [`skip_detector`] - Already-classified detection
//! - [`label_manager`] - Label creation, application and verification
//! - [`processor`] - Batch processing and run state
//! - [`scanner`] - Page-at-a-time message retrieval
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod api;
pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod label_manager;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod providers;
pub mod scanner;
pub mod skip_detector;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{
    Category, ClassificationResult, EmailMessage, ModelChoice, PerMessageOutcome, Priority,
    ProviderUsed,
};

// Pipeline entry point
pub use api::{ClassifyRequest, ClassifyResponse, Pipeline};

// Config types
pub use config::{ClassificationConfig, ClientConfig, Config, LabelConfig, PipelineConfig, ProviderConfig};

// Client traits
pub use client::{GmailClient, LabelInfo, MessagePage, ProductionGmailClient};

// Pipeline components
pub use classifier::HeuristicClassifier;
pub use label_manager::{closest_label_match, LabelManager, LabelMapping};
pub use orchestrator::ClassificationOrchestrator;
pub use processor::{BatchOptions, BatchProcessor, BatchProgress, BatchRunState};
pub use providers::{AnthropicClassifier, ClassificationProvider, OpenAiClassifier};
pub use scanner::EmailScanner;
pub use skip_detector::SkipDetector;
