//! Per-vendor deviations of Chat Completions endpoints.

use crate::model::{MaxTokensField, Model};

/// Compat flags after applying detection and the model's overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedCompat {
    pub supports_store: bool,
    pub supports_developer_role: bool,
    pub supports_reasoning_effort: bool,
    pub supports_usage_in_streaming: bool,
    pub max_tokens_field: MaxTokensField,
    pub requires_tool_result_name: bool,
}

fn matches(model: &Model, needles: &[&str]) -> bool {
    let provider = model.provider.as_str();
    needles
        .iter()
        .any(|needle| provider == *needle || model.base_url.contains(needle))
}

impl ResolvedCompat {
    /// Detects flags from the provider id and base URL.
    pub fn detect(model: &Model) -> Self {
        let non_standard = matches(model, &["cerebras", "x.ai", "xai", "mistral", "deepseek", "chutes"]);
        let mistral = matches(model, &["mistral", "chutes"]);
        let grok = matches(model, &["x.ai", "xai"]);
        Self {
            supports_store: !non_standard,
            supports_developer_role: !non_standard,
            supports_reasoning_effort: !grok,
            supports_usage_in_streaming: true,
            max_tokens_field: if mistral {
                MaxTokensField::MaxTokens
            } else {
                MaxTokensField::MaxCompletionTokens
            },
            requires_tool_result_name: mistral,
        }
    }

    /// Detected flags with the model's explicit overrides applied.
    pub fn for_model(model: &Model) -> Self {
        let mut resolved = Self::detect(model);
        let Some(compat) = &model.compat else {
            return resolved;
        };
        if let Some(v) = compat.supports_store {
            resolved.supports_store = v;
        }
        if let Some(v) = compat.supports_developer_role {
            resolved.supports_developer_role = v;
        }
        if let Some(v) = compat.supports_reasoning_effort {
            resolved.supports_reasoning_effort = v;
        }
        if let Some(v) = compat.supports_usage_in_streaming {
            resolved.supports_usage_in_streaming = v;
        }
        if let Some(v) = compat.max_tokens_field {
            resolved.max_tokens_field = v;
        }
        if let Some(v) = compat.requires_tool_result_name {
            resolved.requires_tool_result_name = v;
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpenAiCompat;
    use crate::types::Api;

    #[test]
    fn openai_gets_the_standard_flags() {
        let model = Model::new("gpt-4o-mini", Api::OpenAiCompletions, "openai", "https://api.openai.com/v1");
        let compat = ResolvedCompat::for_model(&model);
        assert!(compat.supports_store && compat.supports_developer_role);
        assert_eq!(compat.max_tokens_field, MaxTokensField::MaxCompletionTokens);
        assert!(!compat.requires_tool_result_name);
    }

    #[test]
    fn mistral_is_detected_from_the_base_url() {
        let model = Model::new("devstral", Api::OpenAiCompletions, "custom", "https://api.mistral.ai/v1");
        let compat = ResolvedCompat::for_model(&model);
        assert!(!compat.supports_store);
        assert_eq!(compat.max_tokens_field, MaxTokensField::MaxTokens);
        assert!(compat.requires_tool_result_name);
    }

    #[test]
    fn model_overrides_win_over_detection() {
        let model = Model::new("grok-4", Api::OpenAiCompletions, "xai", "https://api.x.ai/v1").compat(
            OpenAiCompat {
                supports_reasoning_effort: Some(true),
                ..OpenAiCompat::default()
            },
        );
        let compat = ResolvedCompat::for_model(&model);
        assert!(compat.supports_reasoning_effort);
        assert!(!compat.supports_developer_role);
    }
}
