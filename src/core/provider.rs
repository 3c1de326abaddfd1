//! Provider identification and thinking-mode field lookup.
//!
//! OpenAI-compatible endpoints disagree on how "thinking" output is
//! toggled: the field name and its enable/disable values are both
//! provider-specific. Rather than string-matching model ids at request
//! time, providers are an enumerated tag with a static lookup table, and
//! a model-id substring classifier is applied only for relay endpoints
//! (or when no explicit tag is configured).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::config::ThinkingMode;

/// Known providers, detected from the endpoint domain or set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// open.bigmodel.cn (Zhipu GLM).
    BigModel,
    /// dashscope.aliyuncs.com (Qwen).
    Aliyun,
    /// ark.cn-beijing.volces.com (Doubao/Seed).
    Volces,
    /// generativelanguage.googleapis.com (Gemini).
    Google,
    /// api.siliconflow.cn.
    SiliconFlow,
    /// api.302.ai relay; the upstream model decides the thinking field.
    Relay302,
    /// Any other OpenAI-compatible endpoint.
    Default,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BigModel => "bigmodel",
            Self::Aliyun => "aliyun",
            Self::Volces => "volces",
            Self::Google => "google",
            Self::SiliconFlow => "siliconflow",
            Self::Relay302 => "302.ai",
            Self::Default => "default",
        };
        write!(f, "{name}")
    }
}

/// A provider's thinking-mode request field and its on/off values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingField {
    /// JSON field name injected into the request body.
    pub field: &'static str,
    /// Value when thinking is enabled.
    pub enable: Value,
    /// Value when thinking is disabled.
    pub disable: Value,
}

impl ThinkingField {
    /// The value to inject for the given mode, or `None` for
    /// [`ThinkingMode::Default`] (send nothing).
    #[must_use]
    pub fn value_for(&self, mode: ThinkingMode) -> Option<Value> {
        match mode {
            ThinkingMode::Enable => Some(self.enable.clone()),
            ThinkingMode::Disable => Some(self.disable.clone()),
            ThinkingMode::Default => None,
        }
    }
}

impl Provider {
    /// Detect a provider from the endpoint's domain.
    #[must_use]
    pub fn from_domain(domain: &str) -> Self {
        match domain {
            "open.bigmodel.cn" => Self::BigModel,
            "dashscope.aliyuncs.com" => Self::Aliyun,
            "ark.cn-beijing.volces.com" => Self::Volces,
            "generativelanguage.googleapis.com" => Self::Google,
            "api.siliconflow.cn" => Self::SiliconFlow,
            "api.302.ai" => Self::Relay302,
            _ => Self::Default,
        }
    }

    /// Best-effort classifier from a model id, for relay endpoints where
    /// the domain says nothing about the upstream model family.
    #[must_use]
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id.trim().to_lowercase();
        if id.contains("glm-4.5") {
            Some(Self::BigModel)
        } else if id.contains("qwen3") {
            Some(Self::Aliyun)
        } else if id.contains("seed-1-6") {
            Some(Self::Volces)
        } else if id.contains("gemini") {
            Some(Self::Google)
        } else {
            None
        }
    }

    /// The thinking-mode field for this provider, if it has one.
    ///
    /// `model_id` is consulted only for [`Provider::Relay302`].
    #[must_use]
    pub fn thinking_field(self, model_id: &str) -> Option<ThinkingField> {
        match self {
            Self::BigModel | Self::Volces => Some(ThinkingField {
                field: "thinking",
                enable: json!({"type": "enabled"}),
                disable: json!({"type": "disabled"}),
            }),
            Self::Aliyun => Some(ThinkingField {
                field: "extra_body",
                enable: json!({"enable_thinking": true}),
                disable: json!({"enable_thinking": false}),
            }),
            Self::Google => Some(ThinkingField {
                field: "extra_body",
                enable: json!({
                    "google": {
                        "thinking_config": {"thinking_budget": -1, "include_thoughts": true}
                    }
                }),
                disable: json!({
                    "google": {
                        "thinking_config": {"thinking_budget": 0, "include_thoughts": false}
                    }
                }),
            }),
            Self::SiliconFlow => Some(ThinkingField {
                field: "enable_thinking",
                enable: json!(true),
                disable: json!(false),
            }),
            Self::Relay302 => {
                Self::from_model_id(model_id).and_then(|p| p.thinking_field(model_id))
            }
            Self::Default => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_domains_map_to_providers() {
        assert_eq!(Provider::from_domain("open.bigmodel.cn"), Provider::BigModel);
        assert_eq!(Provider::from_domain("dashscope.aliyuncs.com"), Provider::Aliyun);
        assert_eq!(Provider::from_domain("ark.cn-beijing.volces.com"), Provider::Volces);
        assert_eq!(
            Provider::from_domain("generativelanguage.googleapis.com"),
            Provider::Google
        );
        assert_eq!(Provider::from_domain("api.siliconflow.cn"), Provider::SiliconFlow);
        assert_eq!(Provider::from_domain("api.302.ai"), Provider::Relay302);
        assert_eq!(Provider::from_domain("api.openai.com"), Provider::Default);
    }

    #[test]
    fn model_id_classifier_is_case_insensitive() {
        assert_eq!(Provider::from_model_id("GLM-4.5-air"), Some(Provider::BigModel));
        assert_eq!(Provider::from_model_id("Qwen3-235B"), Some(Provider::Aliyun));
        assert_eq!(Provider::from_model_id("doubao-seed-1-6"), Some(Provider::Volces));
        assert_eq!(Provider::from_model_id("gemini-2.5-pro"), Some(Provider::Google));
        assert_eq!(Provider::from_model_id("gpt-4o"), None);
    }

    #[test]
    fn relay_defers_to_model_id() {
        let field = Provider::Relay302.thinking_field("qwen3-max").expect("qwen3 has a field");
        assert_eq!(field.field, "extra_body");
        assert!(Provider::Relay302.thinking_field("gpt-4o").is_none());
    }

    #[test]
    fn default_provider_has_no_thinking_field() {
        assert!(Provider::Default.thinking_field("any-model").is_none());
    }

    #[test]
    fn thinking_value_follows_mode() {
        let field = Provider::SiliconFlow.thinking_field("x").expect("has field");
        assert_eq!(field.value_for(ThinkingMode::Enable), Some(json!(true)));
        assert_eq!(field.value_for(ThinkingMode::Disable), Some(json!(false)));
        assert_eq!(field.value_for(ThinkingMode::Default), None);
    }
}
