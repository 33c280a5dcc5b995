use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default = "default_max_emails")]
    pub default_max_emails: u32,
    #[serde(default = "default_max_emails_limit")]
    pub max_emails_limit: u32,
    #[serde(default = "default_true")]
    pub skip_classified: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            default_max_emails: default_max_emails(),
            max_emails_limit: default_max_emails_limit(),
            skip_classified: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Extra label prefixes that also mark a message as classified
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

impl LabelConfig {
    /// Prefixes that mark a message as already classified.
    ///
    /// Always starts with `<prefix>/`, so labels this pipeline creates are
    /// recognised on the next run whatever `skip_prefixes` says.
    pub fn classified_prefixes(&self) -> Vec<String> {
        let mut prefixes = vec![format!("{}/", self.prefix)];
        for extra in &self.skip_prefixes {
            if !prefixes.iter().any(|p| p.eq_ignore_ascii_case(extra)) {
                prefixes.push(extra.clone());
            }
        }
        prefixes
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_primary")]
    pub primary: ProviderConfig,
    #[serde(default = "default_secondary")]
    pub secondary: ProviderConfig,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

/// Connection settings for one AI classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// API key from the environment, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_emails() -> u32 {
    100
}

fn default_max_emails_limit() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "Classifier".to_string()
}

fn default_skip_prefixes() -> Vec<String> {
    vec!["Classifier/".to_string()]
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_primary() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
        api_key_env: "OPENAI_API_KEY".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

fn default_secondary() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.anthropic.com/v1".to_string(),
        model: "claude-3-5-haiku-latest".to_string(),
        api_key_env: "ANTHROPIC_API_KEY".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.default_batch_size == 0 {
            return Err(GmailError::ConfigError(
                "pipeline.default_batch_size must be at least 1".to_string(),
            ));
        }
        if self.pipeline.default_batch_size > 100 {
            return Err(GmailError::ConfigError(
                "pipeline.default_batch_size cannot exceed 100".to_string(),
            ));
        }
        if self.pipeline.max_emails_limit == 0 {
            return Err(GmailError::ConfigError(
                "pipeline.max_emails_limit must be at least 1".to_string(),
            ));
        }
        if self.pipeline.default_max_emails == 0
            || self.pipeline.default_max_emails > self.pipeline.max_emails_limit
        {
            return Err(GmailError::ConfigError(format!(
                "pipeline.default_max_emails must be between 1 and {}",
                self.pipeline.max_emails_limit
            )));
        }

        if self.labels.prefix.is_empty() {
            return Err(GmailError::ConfigError(
                "labels.prefix cannot be empty".to_string(),
            ));
        }
        if self.labels.prefix.contains('/') {
            return Err(GmailError::ConfigError(
                "labels.prefix cannot contain '/' character".to_string(),
            ));
        }
        if self.labels.skip_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(GmailError::ConfigError(
                "labels.skip_prefixes cannot contain empty strings".to_string(),
            ));
        }

        if self.client.max_concurrent_requests == 0 {
            return Err(GmailError::ConfigError(
                "client.max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        for (name, provider) in [
            ("primary", &self.classification.primary),
            ("secondary", &self.classification.secondary),
        ] {
            if provider.base_url.is_empty() || provider.model.is_empty() {
                return Err(GmailError::ConfigError(format!(
                    "classification.{} requires base_url and model",
                    name
                )));
            }
            if provider.timeout_secs == 0 {
                return Err(GmailError::ConfigError(format!(
                    "classification.{}.timeout_secs must be greater than 0",
                    name
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.pipeline.default_batch_size, 10);
        assert_eq!(config.pipeline.default_max_emails, 100);
        assert_eq!(config.pipeline.max_emails_limit, 500);
        assert!(config.pipeline.skip_classified);

        assert_eq!(config.labels.prefix, "Classifier");
        assert_eq!(config.labels.skip_prefixes, vec!["Classifier/".to_string()]);

        assert_eq!(config.classification.primary.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.classification.secondary.api_key_env, "ANTHROPIC_API_KEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_batch_size() {
        let mut config = Config::default();
        config.pipeline.default_batch_size = 0;
        assert!(config.validate().unwrap_err().to_string().contains("at least 1"));

        config.pipeline.default_batch_size = 101;
        assert!(config.validate().unwrap_err().to_string().contains("cannot exceed 100"));

        config.pipeline.default_batch_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_prefix() {
        let mut config = Config::default();
        config.labels.prefix = "Nested/Prefix".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("'/'"));

        config.labels.prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_max_emails() {
        let mut config = Config::default();
        config.pipeline.default_max_emails = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_api_key_from_env() {
        let provider = ProviderConfig {
            base_url: "http://localhost".to_string(),
            model: "m".to_string(),
            api_key_env: "GMAIL_CLASSIFIER_TEST_UNSET_KEY".to_string(),
            timeout_secs: 5,
        };
        assert!(provider.api_key().is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            default_batch_size = 25

            [labels]
            prefix = "AI"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.default_batch_size, 25);
        assert_eq!(config.pipeline.default_max_emails, 100);
        assert_eq!(config.labels.prefix, "AI");
        assert_eq!(config.labels.skip_prefixes, vec!["Classifier/".to_string()]);
        assert_eq!(config.classification.primary.model, "gpt-4o-mini");
    }

    #[test]
    fn test_classified_prefixes_follow_label_prefix() {
        let mut labels = LabelConfig::default();
        assert_eq!(labels.classified_prefixes(), vec!["Classifier/".to_string()]);

        labels.prefix = "AI".to_string();
        assert_eq!(
            labels.classified_prefixes(),
            vec!["AI/".to_string(), "Classifier/".to_string()]
        );

        labels.skip_prefixes = vec!["ai/".to_string(), "Triage/".to_string()];
        assert_eq!(
            labels.classified_prefixes(),
            vec!["AI/".to_string(), "Triage/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.pipeline.default_batch_size = 20;

        config.save(file.path()).await.unwrap();
        let loaded = Config::load(file.path()).await.unwrap();

        assert_eq!(loaded.pipeline.default_batch_size, 20);
        assert_eq!(loaded.labels.prefix, "Classifier");
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("/nonexistent/gmail-classifier.toml"))
            .await
            .unwrap();
        assert_eq!(config.pipeline.default_batch_size, 10);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[pipeline]\ndefault_batch_size = 0\n")
            .await
            .unwrap();

        assert!(Config::load(file.path()).await.is_err());
    }
}
