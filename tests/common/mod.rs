//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use gmail_classifier::client::{GmailClient, LabelInfo, MessagePage};
use gmail_classifier::error::{GmailError, Result};
use gmail_classifier::models::EmailMessage;
use gmail_classifier::providers::{ClassificationProvider, RawClassification};
use mockall::mock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Create a test message carrying the given label names
pub fn create_test_message(id: &str, subject: &str, body: &str, labels: &[&str]) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        sender: format!("sender-{}@example.com", id),
        body: body.to_string(),
        timestamp: None,
        existing_labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}

/// Numbered messages with a neutral subject
pub fn create_test_messages(count: usize) -> Vec<EmailMessage> {
    (0..count)
        .map(|i| create_test_message(&format!("msg_{:03}", i), "Hello there", "", &["INBOX"]))
        .collect()
}

pub fn label(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Connect closure handing out a prepared client
pub fn connect_to(
    client: Arc<dyn GmailClient>,
) -> impl FnOnce(&str) -> Result<Arc<dyn GmailClient>> {
    move |_token| Ok(client)
}

// ============================================================================
// Mock Gmail client
// ============================================================================

mock! {
    pub Gmail {}

    #[async_trait]
    impl GmailClient for Gmail {
        async fn list_message_page(
            &self,
            query: &str,
            page_token: Option<String>,
            max_results: u32,
        ) -> Result<MessagePage>;
        async fn get_message(&self, id: &str) -> Result<EmailMessage>;
        async fn get_message_label_ids(&self, id: &str) -> Result<Vec<String>>;
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, name: &str) -> Result<String>;
        async fn apply_label(&self, message_id: &str, label_id: &str) -> Result<()>;
    }
}

// ============================================================================
// In-memory mailbox
// ============================================================================

#[derive(Default)]
struct MailboxState {
    /// Message id -> message; existing_labels holds label IDs
    messages: BTreeMap<String, EmailMessage>,
    /// Label id -> name
    labels: BTreeMap<String, String>,
    next_label: usize,
}

/// Stateful stand-in for a Gmail mailbox.
///
/// Labels applied in one run are visible to the next, which makes repeated
/// runs over the same mailbox observable. Pages are keyed by the index of the
/// first message on the page.
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    pub apply_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl FakeMailbox {
    /// Seed the mailbox. Label names on the messages are registered as
    /// labels; uppercase names are treated as system labels whose id is the name.
    pub fn with_messages(messages: Vec<EmailMessage>) -> Self {
        let mailbox = Self::default();
        {
            let mut state = mailbox.state.lock().unwrap();
            for mut message in messages {
                let ids: BTreeSet<String> = message
                    .existing_labels
                    .iter()
                    .map(|name| state.register(name))
                    .collect();
                message.existing_labels = ids;
                state.messages.insert(message.id.clone(), message);
            }
        }
        mailbox
    }

    /// Register an extra label without attaching it to any message
    pub fn with_label(self, name: &str) -> Self {
        self.state.lock().unwrap().register(name);
        self
    }

    /// Label names currently on a message
    pub fn label_names(&self, message_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.messages[message_id]
            .existing_labels
            .iter()
            .map(|id| state.labels[id].clone())
            .collect()
    }

    pub fn label_count(&self) -> usize {
        self.state.lock().unwrap().labels.len()
    }

    pub fn applied(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl MailboxState {
    fn register(&mut self, name: &str) -> String {
        if let Some((id, _)) = self.labels.iter().find(|(_, n)| n.as_str() == name) {
            return id.clone();
        }
        let id = if name.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            name.to_string()
        } else {
            self.next_label += 1;
            format!("Label_{}", self.next_label)
        };
        self.labels.insert(id.clone(), name.to_string());
        id
    }
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn list_message_page(
        &self,
        _query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage> {
        let state = self.state.lock().unwrap();
        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| GmailError::BadRequest(format!("bad page token {}", token)))?,
            None => 0,
        };
        let end = (start + max_results as usize).min(state.messages.len());

        Ok(MessagePage {
            message_ids: state.messages.keys().skip(start).take(end.saturating_sub(start)).cloned().collect(),
            next_page_token: (end < state.messages.len()).then(|| end.to_string()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))
    }

    async fn get_message_label_ids(&self, id: &str) -> Result<Vec<String>> {
        let message = self.get_message(id).await?;
        Ok(message.existing_labels.into_iter().collect())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.labels.iter().map(|(id, name)| label(id, name)).collect())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.labels.values().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(GmailError::BadRequest(format!("Label name exists or conflicts: {}", name)));
        }
        Ok(state.register(name))
    }

    async fn apply_label(&self, message_id: &str, label_id: &str) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if !state.labels.contains_key(label_id) {
            return Err(GmailError::BadRequest(format!("Invalid label: {}", label_id)));
        }
        let message = state
            .messages
            .get_mut(message_id)
            .ok_or_else(|| GmailError::MessageNotFound(message_id.to_string()))?;
        message.existing_labels.insert(label_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Classification providers
// ============================================================================

/// Provider that always fails, counting its calls
#[derive(Default)]
pub struct FailingProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ClassificationProvider for FailingProvider {
    async fn classify(&self, _subject: &str, _body: &str, _sender: &str) -> Result<RawClassification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GmailError::ProviderError {
            provider: "test".to_string(),
            message: "HTTP 503: upstream unavailable".to_string(),
        })
    }
}

/// Provider that answers every message with the same category
pub struct FixedProvider {
    pub category: String,
    pub calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClassificationProvider for FixedProvider {
    async fn classify(&self, _subject: &str, _body: &str, _sender: &str) -> Result<RawClassification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawClassification {
            category: self.category.clone(),
            confidence: Some(0.9),
            sentiment: Some(0.2),
            priority: None,
            needs_follow_up: Some(false),
            reasoning: Some("fixed answer".to_string()),
        })
    }
}
