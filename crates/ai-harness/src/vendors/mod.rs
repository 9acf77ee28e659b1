//! Built-in vendor adapters and the transport helpers they share.
//!
//! Each vendor module owns its client configuration, per-call options,
//! payload construction and wire-event translation, so the root API stays
//! vendor-agnostic.
pub mod anthropic;
pub mod bedrock;
pub(crate) mod http;
pub mod openai_completions;
pub mod openai_responses;
pub(crate) mod simple;
pub(crate) mod sse;

use std::sync::Arc;

use serde_json::Value;

use crate::errors::HarnessError;
use crate::provider::ProviderAdapter;

/// One adapter per built-in protocol, configured from the environment.
pub fn builtin_providers() -> Result<Vec<Arc<dyn ProviderAdapter>>, HarnessError> {
    Ok(vec![
        Arc::new(anthropic::AnthropicProvider::from_env()?),
        Arc::new(openai_responses::OpenAiResponsesProvider::from_env()?),
        Arc::new(openai_completions::OpenAiCompletionsProvider::from_env()?),
        Arc::new(bedrock::BedrockProvider::from_env()?),
    ])
}

/// Stand-in for absent wire fields.
pub(crate) static NULL: Value = Value::Null;

/// JSON number for an `f32` option, keeping its shortest decimal form
/// (`0.2` rather than `0.20000000298023224`).
pub(crate) fn json_f32(value: f32) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Tool parameters as an object schema; vendors reject anything else.
pub(crate) fn object_schema(parameters: &Value) -> Value {
    let mut schema = match parameters {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    schema.insert("type".into(), Value::String("object".into()));
    schema
        .entry("properties")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    Value::Object(schema)
}

/// Replaces characters outside `[A-Za-z0-9_-]` with `_` and truncates to
/// `max_len` characters.
pub(crate) fn sanitize_tool_call_id(id: &str, max_len: usize) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(max_len)
        .collect()
}

/// Reads a non-negative integer token count.
pub(crate) fn token_count(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}
