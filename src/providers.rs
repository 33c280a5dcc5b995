//! AI classification providers
//!
//! Both providers send the same structured prompt and expect a single JSON
//! object back. Responses are normalised into [`ClassificationResult`] by
//! [`normalize`], which enforces the canonical category set and value ranges.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{GmailError, Result};
use crate::models::{Category, ClassificationResult, Priority, ProviderUsed};

/// Confidence ceiling for results whose category had to be remapped to Other
const OFF_CONTRACT_CONFIDENCE_CAP: f32 = 0.3;

const MAX_BODY_CHARS: usize = 2000;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are an email triage assistant. Classify the email into exactly one of these categories: \
Personal, Work, Spam/Promotions, Social, Notifications/Updates, Finance, Job Opportunities, Important/Follow Up, Other. \
Priority ranking: high for Important/Follow Up and urgent Finance or Work; medium for Job Opportunities, normal Work and urgent Personal; \
low for Social, Notifications/Updates and Spam/Promotions. \
Respond with a single JSON object and nothing else, using the keys: \
\"category\" (one of the categories above, spelled exactly), \"confidence\" (0 to 1), \"sentiment\" (-1 to 1), \
\"priority\" (\"low\", \"medium\" or \"high\"), \"needsFollowUp\" (boolean), \"reasoning\" (one short sentence).";

/// An AI classifier that can be tried as one step of the fallback chain
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    /// Classify one email, returning the provider's raw answer
    async fn classify(&self, subject: &str, body: &str, sender: &str) -> Result<RawClassification>;
}

/// Provider output before normalisation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawClassification {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub sentiment: Option<f32>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "needsFollowUp")]
    pub needs_follow_up: Option<bool>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Turn a raw provider answer into a contract-conforming result tagged with its producer
pub fn normalize(raw: RawClassification, provider: ProviderUsed) -> ClassificationResult {
    let needs_follow_up = raw.needs_follow_up.unwrap_or(false);
    let mut reasoning = raw.reasoning.unwrap_or_default();

    let recognized = Category::from_name(&raw.category);
    let category = recognized.unwrap_or(Category::Other);
    if recognized.is_none() {
        reasoning = format!("Unrecognized category '{}' remapped to Other. {}", raw.category, reasoning)
            .trim_end()
            .to_string();
    }

    let priority = raw
        .priority
        .as_deref()
        .and_then(Priority::parse)
        .unwrap_or_else(|| Priority::derive(category, needs_follow_up));

    let mut result = ClassificationResult {
        category,
        confidence: raw.confidence.unwrap_or(0.5),
        sentiment: raw.sentiment.unwrap_or(0.0),
        priority,
        needs_follow_up,
        reasoning,
        provider_used: provider,
    }
    .clamped();

    if recognized.is_none() {
        result.confidence = result.confidence.min(OFF_CONTRACT_CONFIDENCE_CAP);
    }
    result
}

/// Extract the JSON object from a model reply, tolerating code fences and surrounding prose
pub fn parse_reply(provider: &str, text: &str) -> Result<RawClassification> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => {
            return Err(GmailError::provider(
                provider,
                format!("reply contains no JSON object: {}", truncate(text, 120)),
            ))
        }
    };

    serde_json::from_str(json)
        .map_err(|e| GmailError::provider(provider, format!("unparsable reply: {}", e)))
}

fn user_prompt(subject: &str, body: &str, sender: &str) -> String {
    format!(
        "From: {}\nSubject: {}\n\n{}",
        sender,
        subject,
        truncate(body, MAX_BODY_CHARS)
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn build_http_client(provider: &str, config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| GmailError::provider(provider, format!("failed to create HTTP client: {}", e)))
}

async fn error_from_response(provider: &str, response: reqwest::Response) -> GmailError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    GmailError::provider(provider, format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Primary classifier: an OpenAI-compatible chat completions endpoint
pub struct OpenAiClassifier {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiClassifier {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_http_client("primary", config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Build from configuration; `None` when no API key is available
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        match config.api_key() {
            Some(key) => Self::new(config, key).map(Some),
            None => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "primary"
    }
}

#[async_trait]
impl ClassificationProvider for OpenAiClassifier {
    async fn classify(&self, subject: &str, body: &str, sender: &str) -> Result<RawClassification> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(subject, body, sender),
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat { kind: "json_object" },
        };

        debug!("Classifying with {} model {}", self.name(), self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GmailError::provider(self.name(), format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GmailError::provider(self.name(), format!("invalid response body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GmailError::provider(self.name(), "empty completion"))?;

        parse_reply(self.name(), &content)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Secondary classifier: the Anthropic messages endpoint
pub struct AnthropicClassifier {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl AnthropicClassifier {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_http_client("secondary", config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Build from configuration; `None` when no API key is available
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        match config.api_key() {
            Some(key) => Self::new(config, key).map(Some),
            None => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "secondary"
    }
}

#[async_trait]
impl ClassificationProvider for AnthropicClassifier {
    async fn classify(&self, subject: &str, body: &str, sender: &str) -> Result<RawClassification> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 512,
            system: SYSTEM_PROMPT,
            messages: vec![ChatMessage {
                role: "user",
                content: user_prompt(subject, body, sender),
            }],
        };

        debug!("Classifying with {} model {}", self.name(), self.model);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| GmailError::provider(self.name(), format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GmailError::provider(self.name(), format!("invalid response body: {}", e)))?;

        let text: String = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(GmailError::provider(self.name(), "empty reply"));
        }

        parse_reply(self.name(), &text)
    }
}
