use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::Model;
use crate::options::{SimpleStreamOptions, StreamOptions, VendorOptions};
use crate::provider::{ByteStream, ProviderAdapter, ProviderRequest, StreamCall};
use crate::types::{Api, Context};
use crate::vendors::{http, sanitize_tool_call_id, simple};

use super::config::BedrockClientConfig;
use super::request;
use super::transport;

/// Converse `toolUseId` pattern is `[a-zA-Z0-9_-]+`, at most 64 chars.
const MAX_TOOL_CALL_ID_LEN: usize = 64;

/// Provider adapter for AWS Bedrock `ConverseStream`.
pub struct BedrockProvider {
    client: reqwest::Client,
    config: BedrockClientConfig,
}

impl BedrockProvider {
    pub fn new(config: BedrockClientConfig) -> Result<Self, HarnessError> {
        let client = http::build_client("Bedrock", config.timeout)?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `AWS_BEARER_TOKEN_BEDROCK`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(BedrockClientConfig::from_env())
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for BedrockProvider {
    fn api(&self) -> Api {
        Api::BedrockConverseStream
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn configured_api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    fn map_simple_options(&self, model: &Model, options: &SimpleStreamOptions) -> StreamOptions {
        let mut base = options.base.clone();
        let mut bedrock = base.vendor.bedrock().cloned().unwrap_or_default();
        let plan = options
            .thinking_level()
            .filter(|_| model.reasoning)
            .and_then(|level| simple::thinking_plan(model, options, level));
        match plan {
            Some((max_tokens, budget)) => {
                bedrock.thinking_budget_tokens = Some(budget);
                base.max_tokens = Some(max_tokens);
            }
            None => {
                bedrock.thinking_budget_tokens = None;
                base.max_tokens = Some(simple::base_max_tokens(model, options));
            }
        }
        base.vendor = VendorOptions::Bedrock(bedrock);
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
        let region = options.vendor.bedrock().and_then(|b| b.region.as_deref());
        let url = self.config.converse_stream_url(&model.base_url, &model.id, region);
        let body = request::build_body(model, context, options);
        let auth = request::auth_headers(api_key);
        let headers =
            http::merge_headers([&model.headers, &auth, &self.config.headers, &options.headers]);
        debug!(model = %model.id, %url, messages = context.messages.len(), "built bedrock converse request");
        Ok(ProviderRequest {
            provider: model.provider.clone(),
            url,
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
    use crate::vendors::bedrock::BedrockOptions;

    fn claude() -> Model {
        Model::new(
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            Api::BedrockConverseStream,
            "amazon-bedrock",
            "https://bedrock-runtime.us-east-1.amazonaws.com",
        )
        .reasoning(true)
        .limits(200_000, 64_000)
    }

    fn provider() -> BedrockProvider {
        BedrockProvider::new(BedrockClientConfig::new()).expect("provider")
    }

    #[test]
    fn simple_reasoning_maps_to_a_thinking_budget() {
        let simple = SimpleStreamOptions::default()
            .max_tokens(4_000)
            .reasoning(ThinkingLevel::Medium);
        let options = provider().map_simple_options(&claude(), &simple);
        let bedrock = options.vendor.bedrock().expect("bedrock options");
        assert_eq!(bedrock.thinking_budget_tokens, Some(8_192));
        assert_eq!(options.max_tokens, Some(12_192));
    }

    #[test]
    fn request_uses_bearer_auth_and_call_region() {
        let options = StreamOptions::default()
            .vendor(VendorOptions::Bedrock(BedrockOptions::default().region("eu-west-1")));
        let request = provider()
            .build_request(&claude(), &Context::new(vec![Message::user("hi")]), &options, "bedrock-key")
            .expect("request");
        assert!(
            request
                .url
                .starts_with("https://bedrock-runtime.eu-west-1.amazonaws.com/model/us.anthropic.")
        );
        assert_eq!(request.headers["authorization"], "Bearer bedrock-key");
        assert_eq!(request.headers["accept"], "application/vnd.amazon.eventstream");
        assert!(request.body.get("model").is_none());
    }

    #[test]
    fn tool_call_ids_are_sanitized() {
        assert_eq!(
            provider().normalize_tool_call_id("call_1|fc_2", &claude()),
            "call_1_fc_2"
        );
    }

    #[tokio::test]
    async fn env_gated_smoke_complete_if_key_present() {
        if crate::env::get_env_api_key("amazon-bedrock").is_none() {
            eprintln!("skipping Bedrock smoke test (AWS_BEARER_TOKEN_BEDROCK missing)");
            return;
        }

        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(BedrockProvider::from_env().expect("provider")))
            .with_builtin_models()
            .build()
            .expect("harness");
        let model = harness
            .model("amazon-bedrock", "us.anthropic.claude-sonnet-4-5-20250929-v1:0")
            .expect("catalog model");
        let context = Context::new(vec![Message::user("Reply with exactly the word: ok")]);
        let message = harness
            .complete(&model, context, StreamOptions::default().max_tokens(32))
            .await
            .expect("complete");
        assert!(!message.stop_reason.is_failure(), "smoke failed: {message:?}");
    }
}
