//! Chat-completions wire types.
//!
//! Request bodies are assembled as a [`serde_json::Map`] because the
//! thinking-mode field name is provider-specific and cannot be expressed
//! as a fixed struct field. Response parsing is deliberately lenient:
//! every field a provider might omit defaults instead of erroring, except
//! `choices`, whose absence is a malformed response.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::core::config::{AgentConfig, ThinkingMode};
use crate::core::provider::Provider;

/// Build the JSON body for one chat-completions call.
#[must_use]
pub fn build_request_body(
    config: &AgentConfig,
    provider: Provider,
    system_prompt: &str,
    prompt: &str,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(config.model_id));
    body.insert(
        "messages".to_string(),
        json!([
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": prompt},
        ]),
    );
    body.insert("temperature".to_string(), json!(config.temperature));
    body.insert("top_p".to_string(), json!(config.top_p));

    if config.thinking != ThinkingMode::Default {
        if let Some(field) = provider.thinking_field(&config.model_id) {
            if let Some(value) = field.value_for(config.thinking) {
                body.insert(field.field.to_string(), value);
            }
        }
    }

    if config.force_json {
        body.insert("response_format".to_string(), json!({"type": "json_object"}));
    }

    Value::Object(body)
}

/// Token sub-detail object shared by several usage dialects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// The `usage` object, tolerating the provider dialects for cached and
/// reasoning token sub-fields. Absent fields are zero, never an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Option<TokenDetails>,
    #[serde(default)]
    pub prompt_tokens_details: Option<TokenDetails>,
    #[serde(default)]
    pub prompt_cache_hit_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens_details: Option<TokenDetails>,
    #[serde(default)]
    pub completion_tokens_details: Option<TokenDetails>,
}

/// Normalized per-call token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub cached: u64,
    pub output: u64,
    pub reasoning: u64,
}

impl Usage {
    /// Collapse the dialects into one normalized record.
    ///
    /// Cached tokens: `input_tokens_details.cached_tokens`, then
    /// `prompt_tokens_details.cached_tokens`, then
    /// `prompt_cache_hit_tokens`. Reasoning tokens:
    /// `output_tokens_details.reasoning_tokens`, then
    /// `completion_tokens_details.reasoning_tokens`.
    #[must_use]
    pub fn normalized(&self) -> TokenUsage {
        let cached = self
            .input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .or_else(|| self.prompt_tokens_details.as_ref().map(|d| d.cached_tokens))
            .or(self.prompt_cache_hit_tokens)
            .unwrap_or(0);
        let reasoning = self
            .output_tokens_details
            .as_ref()
            .map(|d| d.reasoning_tokens)
            .or_else(|| {
                self.completion_tokens_details
                    .as_ref()
                    .map(|d| d.reasoning_tokens)
            })
            .unwrap_or(0);

        TokenUsage {
            input: self.prompt_tokens,
            cached,
            output: self.completion_tokens,
            reasoning,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub message: ChatMessage,
}

/// Top-level chat-completions response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// The first choice's content, or empty when the provider sent none.
    #[must_use]
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
    }

    /// The first choice's finish reason, when present.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// Normalized token usage; all zeros when `usage` is absent.
    #[must_use]
    pub fn token_usage(&self) -> TokenUsage {
        self.usage.as_ref().map(Usage::normalized).unwrap_or_default()
    }
}

// Non-greedy so only the first closing tag ends the block.
static LEADING_THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*<think>.*?</think>").expect("static pattern compiles"));

/// Strip a leading `<think>...</think>` block from a reply.
///
/// Some providers interleave reasoning into `content` even with thinking
/// disabled; result handlers must never see it.
#[must_use]
pub fn sanitize_reply(text: &str) -> &str {
    match LEADING_THINK.find(text) {
        Some(found) if found.start() == 0 => &text[found.end()..],
        _ => text,
    }
}
