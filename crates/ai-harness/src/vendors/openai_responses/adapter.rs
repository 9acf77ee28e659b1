use std::collections::BTreeMap;

use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::Model;
use crate::options::{SimpleStreamOptions, StreamOptions, VendorOptions};
use crate::provider::{ByteStream, ProviderAdapter, ProviderRequest, StreamCall};
use crate::types::{Api, Context};
use crate::vendors::{http, sanitize_tool_call_id, simple};

use super::config::OpenAiResponsesClientConfig;
use super::request::{self, split_tool_call_id};
use super::transport;

const MAX_ID_PART_LEN: usize = 64;

/// Provider adapter for OpenAI's Responses API (streaming).
pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
    config: OpenAiResponsesClientConfig,
}

impl OpenAiResponsesProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: OpenAiResponsesClientConfig) -> Result<Self, HarnessError> {
        let client = http::build_client("OpenAI", config.timeout)?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(OpenAiResponsesClientConfig::from_env())
    }
}

/// Keeps the `call_id|item_id` shape; item ids must start with `fc`.
fn normalize_responses_id(id: &str) -> String {
    match split_tool_call_id(id) {
        (call_id, Some(item_id)) => {
            let call_id = sanitize_tool_call_id(call_id, MAX_ID_PART_LEN);
            let mut item_id = sanitize_tool_call_id(item_id, MAX_ID_PART_LEN);
            if !item_id.starts_with("fc") {
                item_id = sanitize_tool_call_id(&format!("fc_{item_id}"), MAX_ID_PART_LEN);
            }
            format!("{call_id}|{item_id}")
        }
        (call_id, None) => sanitize_tool_call_id(call_id, MAX_ID_PART_LEN),
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiResponsesProvider {
    fn api(&self) -> Api {
        Api::OpenAiResponses
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn configured_api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    fn map_simple_options(&self, model: &Model, options: &SimpleStreamOptions) -> StreamOptions {
        let mut base = options.base.clone();
        let mut responses = base.vendor.openai_responses().cloned().unwrap_or_default();
        responses.reasoning_effort = simple::reasoning_effort(model, options);
        base.max_tokens = Some(simple::base_max_tokens(model, options));
        base.vendor = VendorOptions::OpenAiResponses(responses);
        base
    }

    fn normalize_tool_call_id(&self, id: &str, _model: &Model) -> String {
        normalize_responses_id(id)
    }

    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
        api_key: &str,
    ) -> Result<ProviderRequest, ProviderError> {
        let body = request::build_body(model, context, options);
        let auth = BTreeMap::from([
            ("authorization".to_string(), format!("Bearer {api_key}")),
            ("content-type".to_string(), "application/json".to_string()),
        ]);
        let headers =
            http::merge_headers([&model.headers, &auth, &self.config.headers, &options.headers]);
        debug!(model = %model.id, items = body["input"].as_array().map_or(0, Vec::len), "built openai responses request");
        Ok(ProviderRequest {
            provider: model.provider.clone(),
            url: self.config.responses_url(&model.base_url),
            headers,
            body,
        })
    }

    async fn execute_stream(
        &self,
        body: ByteStream,
        options: &StreamOptions,
        call: &mut StreamCall,
    ) -> Result<(), ProviderError> {
        let service_tier = options
            .vendor
            .openai_responses()
            .and_then(|responses| responses.service_tier);
        transport::read_stream(body, call, service_tier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ReasoningEffort;
    use crate::types::{Message, ThinkingLevel};

    fn provider() -> OpenAiResponsesProvider {
        OpenAiResponsesProvider::new(OpenAiResponsesClientConfig::new()).expect("provider")
    }

    fn model() -> Model {
        Model::new("gpt-5", Api::OpenAiResponses, "openai", "https://api.openai.com/v1").reasoning(true)
    }

    #[test]
    fn foreign_ids_get_a_function_item_prefix() {
        assert_eq!(normalize_responses_id("call_1|fc_2"), "call_1|fc_2");
        assert_eq!(normalize_responses_id("call_1|item.2"), "call_1|fc_item_2");
        assert_eq!(normalize_responses_id("toolu_01"), "toolu_01");
    }

    #[test]
    fn simple_reasoning_maps_to_effort() {
        let simple = SimpleStreamOptions::default().reasoning(ThinkingLevel::Minimal);
        let options = provider().map_simple_options(&model(), &simple);
        assert_eq!(
            options.vendor.openai_responses().and_then(|o| o.reasoning_effort),
            Some(ReasoningEffort::Minimal)
        );
        assert_eq!(options.max_tokens, Some(8_192));
    }

    #[test]
    fn request_uses_bearer_auth_and_responses_endpoint() {
        let request = provider()
            .build_request(&model(), &Context::new(vec![Message::user("hi")]), &StreamOptions::default(), "sk-test")
            .expect("request");
        assert_eq!(request.url, "https://api.openai.com/v1/responses");
        assert_eq!(request.headers["authorization"], "Bearer sk-test");
    }

    #[tokio::test]
    async fn env_gated_smoke_complete_if_key_present() {
        if crate::env::get_env_api_key("openai").is_none() {
            eprintln!("skipping OpenAI smoke test (OPENAI_API_KEY missing)");
            return;
        }

        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(
                OpenAiResponsesProvider::from_env().expect("provider"),
            ))
            .with_builtin_models()
            .build()
            .expect("harness");
        let model = harness.model("openai", "gpt-5-mini").expect("catalog model");
        let context = Context::new(vec![Message::user("Return exactly the word: ok")]);
        let message = harness
            .complete(&model, context, StreamOptions::default())
            .await
            .expect("complete");
        assert!(!message.stop_reason.is_failure(), "smoke failed: {message:?}");
    }
}
