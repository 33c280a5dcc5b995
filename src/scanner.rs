//! Page-at-a-time message retrieval

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::models::EmailMessage;

const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// One page of fetched messages plus the token for the next page
#[derive(Debug, Default)]
pub struct FetchedPage {
    pub messages: Vec<EmailMessage>,
    /// Listed messages that could not be loaded, in list order
    pub failed: Vec<(String, GmailError)>,
    pub next_page_token: Option<String>,
}

pub struct EmailScanner {
    client: Arc<dyn GmailClient>,
    concurrency: usize,
}

impl EmailScanner {
    pub fn new(client: Arc<dyn GmailClient>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch one page of messages matching `query`.
    ///
    /// Message label IDs are rewritten to label names so callers can match on
    /// naming conventions; IDs with no known name (system labels) are kept.
    /// Messages that fail to load are returned in `failed` so the caller can
    /// account for them; a failed list or label lookup fails the whole page.
    pub async fn fetch_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<FetchedPage> {
        let page = self
            .client
            .list_message_page(query, page_token, max_results)
            .await?;

        debug!(
            "Listed {} message IDs (more pages: {})",
            page.message_ids.len(),
            page.next_page_token.is_some()
        );

        if page.message_ids.is_empty() {
            return Ok(FetchedPage {
                next_page_token: page.next_page_token,
                ..Default::default()
            });
        }

        let label_names: HashMap<String, String> = self
            .client
            .list_labels()
            .await?
            .into_iter()
            .map(|label| (label.id, label.name))
            .collect();

        let requested = page.message_ids.len();
        let client = &self.client;

        // buffered keeps list order
        let results: Vec<(String, Result<EmailMessage>)> = stream::iter(page.message_ids)
            .map(|id| async move {
                let result = client.get_message(&id).await;
                (id, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut messages = Vec::with_capacity(requested);
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(mut message) => {
                    message.existing_labels = message
                        .existing_labels
                        .into_iter()
                        .map(|label_id| label_names.get(&label_id).cloned().unwrap_or(label_id))
                        .collect();
                    messages.push(message);
                }
                Err(e) => {
                    warn!("Failed to fetch message {}: {}", id, e);
                    failed.push((id, e));
                }
            }
        }

        info!("Fetched {}/{} messages", messages.len(), requested);

        Ok(FetchedPage {
            messages,
            failed,
            next_page_token: page.next_page_token,
        })
    }
}
