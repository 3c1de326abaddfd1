//! Factories for chat-completion response bodies and agent configs.

use serde_json::{Value, json};
use translate_dispatch::AgentConfig;

/// A well-formed chat-completions response body.
pub fn chat_completion(
    content: &str,
    finish_reason: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "finish_reason": finish_reason,
            "message": {"role": "assistant", "content": content}
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}

/// A response body with no `usage` object.
pub fn chat_completion_no_usage(content: &str, finish_reason: &str) -> Value {
    json!({
        "choices": [{
            "index": 0,
            "finish_reason": finish_reason,
            "message": {"role": "assistant", "content": content}
        }]
    })
}

/// Config pointed at a mock server, with short timeouts.
pub fn agent_config(base_url: &str) -> AgentConfig {
    AgentConfig {
        base_url: base_url.to_string(),
        api_key: Some("test-key".to_string()),
        model_id: "test-model".to_string(),
        timeout_secs: 10,
        ..AgentConfig::default()
    }
}
