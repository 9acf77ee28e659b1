use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Api;

/// Stable identifier for the vendor serving a model (for example `anthropic`
/// or `groq`). Several providers can share one [`Api`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Input kinds a model accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

/// Prices in dollars per million tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl ModelCost {
    pub const fn new(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_write,
        }
    }
}

/// Which field carries the output token limit on a Chat Completions endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxTokensField {
    MaxCompletionTokens,
    MaxTokens,
}

/// Per-vendor deviations of Chat Completions compatible endpoints. Unset
/// fields are detected from the provider and base URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiCompat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_developer_role: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_reasoning_effort: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_usage_in_streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_field: Option<MaxTokensField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_tool_result_name: Option<bool>,
}

/// A concrete model served by a provider over one protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Vendor model id sent on the wire (for example `claude-sonnet-4-5`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub api: Api,
    pub provider: ProviderId,
    pub base_url: String,
    /// Whether the model supports reasoning/thinking parameters.
    pub reasoning: bool,
    pub input: Vec<InputModality>,
    pub cost: ModelCost,
    pub context_window: u64,
    pub max_tokens: u64,
    /// Extra headers sent with every request for this model.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compat: Option<OpenAiCompat>,
}

impl Model {
    /// Creates a text-only, non-reasoning model with zero pricing; use the
    /// setters to fill in the rest.
    pub fn new(
        id: impl Into<String>,
        api: Api,
        provider: impl Into<ProviderId>,
        base_url: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            api,
            provider: provider.into(),
            base_url: base_url.into(),
            reasoning: false,
            input: vec![InputModality::Text],
            cost: ModelCost::default(),
            context_window: 128_000,
            max_tokens: 8_192,
            headers: BTreeMap::new(),
            compat: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_images(mut self) -> Self {
        if !self.input.contains(&InputModality::Image) {
            self.input.push(InputModality::Image);
        }
        self
    }

    pub fn cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn limits(mut self, context_window: u64, max_tokens: u64) -> Self {
        self.context_window = context_window;
        self.max_tokens = max_tokens;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn compat(mut self, compat: OpenAiCompat) -> Self {
        self.compat = Some(compat);
        self
    }

    pub fn supports_images(&self) -> bool {
        self.input.contains(&InputModality::Image)
    }

    #[cfg(test)]
    pub(crate) fn test_model() -> Self {
        Self::new(
            "test-model",
            Api::AnthropicMessages,
            "anthropic",
            "https://api.anthropic.com",
        )
        .cost(ModelCost::new(3.0, 15.0, 0.3, 3.75))
        .limits(200_000, 64_000)
    }
}
