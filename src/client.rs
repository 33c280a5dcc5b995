//! Gmail API client with rate limiting and retry logic

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::{
    api::{Label, Message, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{LABELS_SCOPE, MODIFY_SCOPE};
use crate::config::ClientConfig;
use crate::error::{GmailError, Result};
use crate::models::EmailMessage;

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// One page of message IDs from a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub message_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Mailbox operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List one page of message IDs matching a query
    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage>;

    /// Get message metadata; `existing_labels` holds label IDs
    async fn get_message(&self, id: &str) -> Result<EmailMessage>;

    /// Re-read the label IDs currently on a message
    async fn get_message_label_ids(&self, id: &str) -> Result<Vec<String>>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its ID
    async fn create_label(&self, name: &str) -> Result<String>;

    /// Apply a label to a message
    async fn apply_label(&self, message_id: &str, label_id: &str) -> Result<()>;
}

/// Production Gmail client with rate limiting and retry logic
///
/// - Semaphore-based concurrency limit shared by all calls
/// - Exponential backoff on transient errors
pub struct ProductionGmailClient {
    hub: Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>,
    rate_limiter: Arc<Semaphore>,
    max_retries: u32,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent requests
    /// * `max_retries` - Retries after the first attempt for transient failures
    pub fn new(
        hub: Gmail<
            hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        >,
        max_concurrent: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_retries,
        }
    }

    /// Build a client for the mailbox owning `access_token`
    pub fn connect(access_token: &str, config: &ClientConfig) -> Result<Self> {
        let hub = crate::auth::hub_from_access_token(access_token)?;
        Ok(Self::new(hub, config.max_concurrent_requests, config.max_retries))
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.rate_limiter
            .acquire()
            .await
            .map_err(|e| GmailError::Unknown(format!("Failed to acquire rate limit permit: {}", e)))
    }

    /// Check if an error is retryable
    fn should_retry(error: &GmailError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(500);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    let wait = match e {
                        GmailError::RateLimitExceeded { retry_after } => {
                            delay.max(Duration::from_secs(retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse Gmail API Message into an [`EmailMessage`]
fn parse_message(msg: Message) -> Result<EmailMessage> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let mut sender = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();

    if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                match name.to_lowercase().as_str() {
                    "from" => sender = value.clone(),
                    "subject" => subject = value.clone(),
                    "date" => date_str = value.clone(),
                    _ => {}
                }
            }
        }
    }

    let timestamp = msg
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| parse_date(&date_str).ok());

    Ok(EmailMessage {
        id,
        subject,
        sender,
        body: msg.snippet.unwrap_or_default(),
        timestamp,
        existing_labels: msg.label_ids.unwrap_or_default().into_iter().collect(),
    })
}

/// Parse RFC 2822 date string
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| GmailError::InvalidMessageFormat(format!("Invalid date format: {}", e)))
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("list_messages", self.max_retries, || async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .max_results(max_results);

            if !query.is_empty() {
                call = call.q(query);
            }
            if let Some(token) = page_token.as_deref() {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(MODIFY_SCOPE).doit().await?;

            let message_ids = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect();

            Ok(MessagePage {
                message_ids,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("get_message", self.max_retries, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_metadata_headers("Date")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            parse_message(msg)
        })
        .await
    }

    async fn get_message_label_ids(&self, id: &str) -> Result<Vec<String>> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("get_message_labels", self.max_retries, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("minimal")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            Ok(msg.label_ids.unwrap_or_default())
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("list_labels", self.max_retries, || async {
            let timeout_duration = Duration::from_secs(30);
            let api_call = async {
                debug!("Calling Gmail API to list labels...");
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope(LABELS_SCOPE)
                    .doit()
                    .await
            };

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Gmail API list_labels call timed out after {:?}", timeout_duration);
                    return Err(GmailError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("create_label", self.max_retries, || async {
            let label = Label {
                name: Some(name.to_string()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };

            let (_, created_label) = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope(LABELS_SCOPE)
                .doit()
                .await?;

            created_label
                .id
                .ok_or_else(|| GmailError::LabelCreationError(format!("Created label '{}' has no ID", name)))
        })
        .await
    }

    async fn apply_label(&self, message_id: &str, label_id: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;

        Self::with_retry("apply_label", self.max_retries, || async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: Some(vec![label_id.to_string()]),
                remove_label_ids: None,
            };

            self.hub
                .users()
                .messages_modify(modify_request, "me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            Ok(())
        })
        .await
    }
}
