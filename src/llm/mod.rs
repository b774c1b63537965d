//! Generation model clients used by the planner and the extractor.

pub mod json;
pub mod mock;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{LlmConfig, LlmProvider};

pub use json::extract_json_object;
pub use mock::MockGenerator;
pub use openai::OpenAiCompatClient;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No JSON object found in model output")]
    NoJson,

    #[error("Scripted failure: {0}")]
    Scripted(String),
}

impl LlmError {
    /// Rate limits, server errors and dropped connections are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Network(_) => true,
            _ => false,
        }
    }
}

/// A chat model that answers a system + user prompt with raw text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// Client for the configured provider; `None` means offline heuristics.
pub fn build_client(config: &LlmConfig) -> Result<Option<Arc<dyn GenerationClient>>, LlmError> {
    match config.provider {
        LlmProvider::Offline => Ok(None),
        LlmProvider::OpenaiCompat => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                LlmError::Malformed(format!("environment variable {} not set", config.api_key_env))
            })?;
            let client = OpenAiCompatClient::new(
                &config.base_url,
                api_key,
                &config.model,
                std::time::Duration::from_secs(config.timeout_secs),
            )?
            .with_max_retries(config.max_retries);
            Ok(Some(Arc::new(client)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Api { status: 429, body: String::new() }.is_retryable());
        assert!(LlmError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 401, body: String::new() }.is_retryable());
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(!LlmError::NoJson.is_retryable());
    }

    #[test]
    fn test_offline_provider_builds_no_client() {
        let client = build_client(&LlmConfig::default()).unwrap();
        assert!(client.is_none());
    }
}
