use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::Model;
use crate::options::{SimpleStreamOptions, StreamOptions, VendorOptions};
use crate::provider::{ByteStream, ProviderAdapter, ProviderRequest, StreamCall};
use crate::types::{Api, Context};
use crate::vendors::{http, sanitize_tool_call_id, simple};

use super::config::AnthropicClientConfig;
use super::request;
use super::transport;

/// Anthropic accepts `[A-Za-z0-9_-]{1,64}` tool-use ids.
const MAX_TOOL_CALL_ID_LEN: usize = 64;

/// Provider adapter for Anthropic's Messages API (streaming).
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicClientConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicClientConfig) -> Result<Self, HarnessError> {
        let client = http::build_client("Anthropic", config.timeout)?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `ANTHROPIC_OAUTH_TOKEN` or `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(AnthropicClientConfig::from_env())
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn api(&self) -> Api {
        Api::AnthropicMessages
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn configured_api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    fn map_simple_options(&self, model: &Model, options: &SimpleStreamOptions) -> StreamOptions {
        let mut base = options.base.clone();
        let mut anthropic = base.vendor.anthropic().cloned().unwrap_or_default();
        let plan = options
            .thinking_level()
            .filter(|_| model.reasoning)
            .and_then(|level| simple::thinking_plan(model, options, level));
        match plan {
            Some((max_tokens, budget)) => {
                anthropic.thinking_enabled = true;
                anthropic.thinking_budget_tokens = Some(budget);
                base.max_tokens = Some(max_tokens);
            }
            None => {
                anthropic.thinking_enabled = false;
                anthropic.thinking_budget_tokens = None;
                base.max_tokens = Some(simple::base_max_tokens(model, options));
            }
        }
        base.vendor = VendorOptions::Anthropic(anthropic);
        base
    }

    fn normalize_tool_call_id(&self, id: &str, _model: &Model) -> String {
        sanitize_tool_call_id(id, MAX_TOOL_CALL_ID_LEN)
    }

    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
        api_key: &str,
    ) -> Result<ProviderRequest, ProviderError> {
        let anthropic = options.vendor.anthropic().cloned().unwrap_or_default();
        let base_url = self.config.base_url.as_deref().unwrap_or(&model.base_url);
        let oauth = request::is_oauth_token(api_key);
        let body = request::build_body(model, base_url, context, options, oauth);
        let auth = request::auth_headers(api_key, &anthropic);
        let headers =
            http::merge_headers([&model.headers, &auth, &self.config.headers, &options.headers]);
        debug!(model = %model.id, oauth, messages = context.messages.len(), "built anthropic messages request");
        Ok(ProviderRequest {
            provider: model.provider.clone(),
            url: self.config.messages_url(&model.base_url),
            headers,
            body,
        })
    }

    async fn execute_stream(
        &self,
        body: ByteStream,
        _options: &StreamOptions,
        call: &mut StreamCall,
    ) -> Result<(), ProviderError> {
        transport::read_stream(body, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ThinkingLevel};

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(AnthropicClientConfig::new()).expect("provider")
    }

    #[test]
    fn foreign_tool_call_ids_are_made_acceptable() {
        let model = Model::test_model();
        assert_eq!(
            provider().normalize_tool_call_id("call_abc|fc_123", &model),
            "call_abc_fc_123"
        );
    }

    #[test]
    fn simple_reasoning_maps_to_a_thinking_budget() {
        let model = Model::test_model().reasoning(true);
        let simple = SimpleStreamOptions::default()
            .max_tokens(4_000)
            .reasoning(ThinkingLevel::Low);
        let options = provider().map_simple_options(&model, &simple);
        let anthropic = options.vendor.anthropic().expect("anthropic options");
        assert!(anthropic.thinking_enabled);
        assert_eq!(anthropic.thinking_budget_tokens, Some(2_048));
        assert_eq!(options.max_tokens, Some(6_048));

        let plain = Model::test_model();
        let options = provider().map_simple_options(&plain, &simple);
        assert!(!options.vendor.anthropic().expect("options").thinking_enabled);
        assert_eq!(options.max_tokens, Some(4_000));
    }

    #[test]
    fn request_layers_headers_and_targets_messages_endpoint() {
        let provider = AnthropicProvider::new(
            AnthropicClientConfig::new()
                .base_url("http://localhost:8080/")
                .header("x-proxy", "1"),
        )
        .expect("provider");
        let model = Model::test_model().header("x-model", "m");
        let options = StreamOptions::default().header("X-Proxy", "caller");
        let request = provider
            .build_request(&model, &Context::new(vec![Message::user("hi")]), &options, "sk-ant-api03-k")
            .expect("request");
        assert_eq!(request.url, "http://localhost:8080/v1/messages");
        assert_eq!(request.headers["x-model"], "m");
        assert_eq!(request.headers["x-proxy"], "caller");
        assert_eq!(request.headers["x-api-key"], "sk-ant-api03-k");
        assert_eq!(request.body["model"], "test-model");
        assert_eq!(request.body["stream"], true);
    }

    #[tokio::test]
    async fn env_gated_smoke_complete_if_key_present() {
        if crate::env::get_env_api_key("anthropic").is_none() {
            eprintln!("skipping Anthropic smoke test (ANTHROPIC_API_KEY missing)");
            return;
        }

        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(
                AnthropicProvider::from_env().expect("provider"),
            ))
            .with_builtin_models()
            .build()
            .expect("harness");
        let model = harness
            .model("anthropic", "claude-haiku-4-5")
            .expect("catalog model");
        let context = Context::new(vec![Message::user("Reply with exactly the word: ok")]);
        let message = harness
            .complete(&model, context, StreamOptions::default().max_tokens(32))
            .await
            .expect("complete");
        assert!(!message.stop_reason.is_failure(), "smoke failed: {message:?}");
    }
}
