//! Agent configuration.
//!
//! [`AgentConfig`] is the abstract configuration surface consumed by the
//! dispatch core: endpoint coordinates, sampling parameters, concurrency
//! and quota limits, and the retry ceiling. Loading from files or CLI
//! flags is the caller's concern; [`AgentConfig::from_toml_str`] is
//! provided for consumers that keep agent settings in TOML.

use serde::{Deserialize, Serialize};

use crate::core::provider::Provider;
use crate::error::{DispatchError, Result};

/// Whether to ask the provider for explicit reasoning ("thinking") output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    /// Request thinking output via the provider-specific field.
    Enable,
    /// Suppress thinking output via the provider-specific field.
    #[default]
    Disable,
    /// Send no thinking field; the provider decides.
    Default,
}

/// Configuration for a dispatch [`Agent`](crate::core::dispatcher::Agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible endpoint
    /// (e.g. `https://api.example.com/v1`). Trailing slashes are trimmed.
    pub base_url: String,

    /// Bearer token. Some self-hosted endpoints accept any value.
    pub api_key: Option<String>,

    /// Model identifier sent in the request body.
    pub model_id: String,

    /// Sampling temperature.
    pub temperature: f64,

    /// Nucleus sampling parameter.
    pub top_p: f64,

    /// Maximum number of calls in flight at once. The quota window
    /// throttles actual network issuance, so this can be generous.
    pub concurrency: usize,

    /// Per-call read timeout in seconds.
    pub timeout_secs: u64,

    /// Thinking-mode toggle, applied through the provider lookup table.
    pub thinking: ThinkingMode,

    /// Retry ceiling per request (attempts beyond the first).
    pub retries: u32,

    /// Force `response_format: {"type": "json_object"}` on every request.
    pub force_json: bool,

    /// Requests-per-minute limit. `None` means unlimited.
    pub rpm: Option<u32>,

    /// Tokens-per-minute limit (estimated weights). `None` means unlimited.
    pub tpm: Option<u64>,

    /// Explicit provider tag. When absent, the provider is detected from
    /// the base URL domain.
    pub provider: Option<Provider>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            model_id: String::new(),
            temperature: 0.7,
            top_p: 0.9,
            concurrency: 30,
            timeout_secs: 1200,
            thinking: ThinkingMode::Disable,
            retries: 2,
            force_json: false,
            rpm: None,
            tpm: None,
            provider: None,
        }
    }
}

impl AgentConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConfigParse`] when the document is not
    /// valid TOML or contains mistyped fields.
    pub fn from_toml_str(doc: &str) -> Result<Self> {
        toml::from_str(doc).map_err(|e| DispatchError::ConfigParse(e.to_string()))
    }

    /// Validate fields that would otherwise fail deep inside a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConfigInvalid`] for an empty base URL or
    /// model id, or a zero concurrency limit.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(DispatchError::ConfigInvalid {
                key: "base_url".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.model_id.trim().is_empty() {
            return Err(DispatchError::ConfigInvalid {
                key: "model_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(DispatchError::ConfigInvalid {
                key: "concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
