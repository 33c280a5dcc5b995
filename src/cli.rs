//! Command-line interface

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

use crate::api::{ClassifyRequest, ClassifyResponse, Pipeline};
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::models::{EmailMessage, ModelChoice};
use crate::orchestrator::ClassificationOrchestrator;
use crate::processor::BatchProgress;

#[derive(Parser, Debug)]
#[command(name = "gmail-classify")]
#[command(version)]
#[command(about = "Classify Gmail messages into business categories and label them", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify one page of messages and optionally label them
    Run(RunArgs),

    /// Classify a single message without touching a mailbox
    Classify {
        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        body: String,

        #[arg(long, default_value = "")]
        sender: String,

        /// auto, primary or secondary
        #[arg(long, default_value = "auto")]
        model: String,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// OAuth access token with gmail.modify and gmail.labels scopes
    #[arg(long, env = "GMAIL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Gmail search query
    #[arg(short, long)]
    pub query: Option<String>,

    /// Continuation token from a previous run
    #[arg(long)]
    pub page_token: Option<String>,

    /// Maximum messages to fetch
    #[arg(long)]
    pub max_emails: Option<u32>,

    /// Messages classified concurrently per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Apply category labels to classified messages
    #[arg(long)]
    pub apply_labels: bool,

    /// Reclassify messages that already carry a classifier label
    #[arg(long)]
    pub reclassify: bool,

    /// auto, primary or secondary
    #[arg(long)]
    pub model: Option<String>,

    /// JSON array of pre-fetched messages; skips the mailbox fetch
    #[arg(long)]
    pub emails_file: Option<PathBuf>,

    /// Print the full JSON response
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Translate command-line flags into a pipeline request
    pub fn to_request(&self, emails: Option<Vec<EmailMessage>>) -> ClassifyRequest {
        ClassifyRequest {
            access_token: self.access_token.clone(),
            refresh_token: None,
            max_emails: self.max_emails,
            apply_labels: Some(self.apply_labels),
            skip_classified: self.reclassify.then_some(false),
            query: self.query.clone(),
            page_token: self.page_token.clone(),
            batch_size: self.batch_size,
            ai_model: self.model.clone(),
            emails_to_process: emails,
        }
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: Arc<MultiProgress>,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: Arc<MultiProgress>) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Bar measured in percent, driven by batch completions
    pub fn add_percent_bar(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(100));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

/// Load a JSON array of messages for the re-apply use case
pub async fn load_emails_file(path: &Path) -> Result<Vec<EmailMessage>> {
    let content = tokio::fs::read_to_string(path).await?;
    let messages: Vec<EmailMessage> = serde_json::from_str(&content)?;
    Ok(messages)
}

/// Run the pipeline for one page and return the response
pub async fn run_classification(
    config_path: &Path,
    args: &RunArgs,
    multi: Arc<MultiProgress>,
) -> Result<ClassifyResponse> {
    let reporter = ProgressReporter::new(multi);
    let run_id = uuid::Uuid::new_v4();

    async {
        let config_spinner = reporter.add_spinner("Loading configuration...");
        let config = Config::load(config_path).await?;
        reporter.finish_spinner(&config_spinner, &format!("Configuration loaded from {:?}", config_path));

        let orchestrator = ClassificationOrchestrator::from_config(&config.classification)?;
        info!(
            "Classifiers: primary={}, secondary={}, heuristic=always",
            orchestrator.has_primary(),
            orchestrator.has_secondary()
        );

        let emails = match &args.emails_file {
            Some(path) => Some(load_emails_file(path).await?),
            None => None,
        };

        let client_config = config.client.clone();
        let pipeline = Pipeline::new(config, Arc::new(orchestrator));

        let bar = reporter.add_percent_bar("Classifying");
        let on_batch = |progress: &BatchProgress| {
            bar.set_position(progress.progress as u64);
            bar.set_message(format!("{}/{} messages", progress.processed, progress.total));
        };

        let response = pipeline
            .handle_request(
                args.to_request(emails),
                |token| {
                    let client = ProductionGmailClient::connect(token, &client_config)?;
                    Ok(Arc::new(client) as Arc<dyn GmailClient>)
                },
                Some(&on_batch),
            )
            .await;

        bar.finish_and_clear();
        response
    }
    .instrument(tracing::info_span!("run", id = %run_id))
    .await
}

/// Classify a single message with the configured classifier chain
pub async fn classify_one(
    config_path: &Path,
    subject: &str,
    body: &str,
    sender: &str,
    model: &str,
) -> Result<crate::models::ClassificationResult> {
    let config = Config::load(config_path).await?;
    let model: ModelChoice = model.parse()?;
    let orchestrator = ClassificationOrchestrator::from_config(&config.classification)?;
    orchestrator.classify(subject, body, sender, model).await
}

/// Write a default configuration file
pub async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(GmailError::ConfigError(format!(
            "{:?} already exists; pass --force to overwrite",
            output
        )));
    }
    Config::create_example(output).await
}

/// JSON body printed for a run that failed before producing results
pub fn format_failure_json(error: &GmailError) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&ClassifyResponse::failure(error))
}

/// Human-readable run summary
pub fn format_summary(response: &ClassifyResponse) -> String {
    let mut lines = vec![
        "========================================".to_string(),
        "Classification Summary".to_string(),
        "========================================".to_string(),
        response.message.clone(),
    ];

    if let Some(summary) = &response.summary {
        lines.push(format!("Prospects: {}", summary.prospects));
        lines.push(format!("High priority: {}", summary.high_priority));
        lines.push(format!("Labels created: {}", summary.gmail_labels_created));
    }
    if let Some(verification) = &response.verification {
        lines.push(format!(
            "Label verification: {}/{} applied, {} failed",
            verification.successfully_applied, verification.total_attempted, verification.failed_to_apply
        ));
    }
    match &response.next_page_token {
        Some(token) => lines.push(format!("Next page: --page-token {}", token)),
        None => lines.push("No more pages".to_string()),
    }
    lines.push("========================================".to_string());
    lines.join("\n")
}
