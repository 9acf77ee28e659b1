use std::fmt;

/// Wire protocol spoken by an adapter.
///
/// The provider registry is keyed by this value; a model names the protocol it
/// must be driven with. Built-in protocols have dedicated variants, adapters
/// registered from outside the crate use `Custom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Api {
    /// Anthropic Messages API (SSE).
    AnthropicMessages,
    /// OpenAI Responses API (SSE).
    OpenAiResponses,
    /// OpenAI Chat Completions and compatible vendors (SSE).
    OpenAiCompletions,
    /// AWS Bedrock `ConverseStream` (binary event stream).
    BedrockConverseStream,
    /// Externally registered protocol.
    Custom(String),
}

impl Api {
    /// Creates a protocol id for an externally registered adapter.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// Returns the protocol id as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AnthropicMessages => "anthropic-messages",
            Self::OpenAiResponses => "openai-responses",
            Self::OpenAiCompletions => "openai-completions",
            Self::BedrockConverseStream => "bedrock-converse-stream",
            Self::Custom(name) => name,
        }
    }

    /// Returns `true` when the id is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Api {
    fn from(value: &str) -> Self {
        match value {
            "anthropic-messages" => Self::AnthropicMessages,
            "openai-responses" => Self::OpenAiResponses,
            "openai-completions" => Self::OpenAiCompletions,
            "bedrock-converse-stream" => Self::BedrockConverseStream,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Api {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Api> for String {
    fn from(value: Api) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_parse_to_dedicated_variants() {
        assert_eq!(Api::from("anthropic-messages"), Api::AnthropicMessages);
        assert_eq!(Api::from("bedrock-converse-stream"), Api::BedrockConverseStream);
        assert_eq!(Api::custom("my-proto"), Api::Custom("my-proto".into()));
    }

    #[test]
    fn serializes_as_plain_string() {
        let value = serde_json::to_value(Api::OpenAiResponses).expect("serialize");
        assert_eq!(value, serde_json::json!("openai-responses"));
        let back: Api = serde_json::from_value(serde_json::json!("x-proto")).expect("deserialize");
        assert_eq!(back, Api::Custom("x-proto".into()));
    }
}
