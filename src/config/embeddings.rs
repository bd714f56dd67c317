use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// OpenAI-compatible embedding endpoint (`POST {base_url}/embeddings`).
///
/// Works with OpenAI, Azure-style proxies, Ollama, vLLM and anything else
/// that speaks the same wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingsConfig {
    /// Base URL without the trailing `/embeddings`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Optional for local servers.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Embedding model name.
    pub model: String,

    /// Requested output dimensionality, for models that support shortening.
    /// Must equal `store.dimensions` when set.
    #[serde(default)]
    pub dimensions: Option<usize>,

    /// Maximum number of inputs per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl EmbeddingsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "embeddings.base_url cannot be empty".into(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "embeddings.model cannot be empty".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "embeddings.batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_batch_size() -> usize {
    512
}

fn default_timeout() -> u64 {
    60
}
