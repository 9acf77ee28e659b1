use std::collections::BTreeMap;

use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::Model;
use crate::options::{SimpleStreamOptions, StreamOptions, VendorOptions};
use crate::provider::{ByteStream, ProviderAdapter, ProviderRequest, StreamCall};
use crate::types::{Api, Context};
use crate::vendors::{http, simple};

use super::config::OpenAiCompletionsClientConfig;
use super::request;
use super::transport;

/// Longest tool-call id accepted across compatible vendors.
const MAX_TOOL_CALL_ID_LEN: usize = 40;

/// Provider adapter for Chat Completions compatible endpoints (streaming).
pub struct OpenAiCompletionsProvider {
    client: reqwest::Client,
    config: OpenAiCompletionsClientConfig,
}

impl OpenAiCompletionsProvider {
    pub fn new(config: OpenAiCompletionsClientConfig) -> Result<Self, HarnessError> {
        let client = http::build_client("OpenAI-compatible", config.timeout)?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(OpenAiCompletionsClientConfig::from_env())
    }
}

/// Drops the Responses item-id suffix and caps the length.
fn truncate_tool_call_id(id: &str) -> String {
    let call_id = id.split('|').next().unwrap_or(id);
    call_id.chars().take(MAX_TOOL_CALL_ID_LEN).collect()
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompletionsProvider {
    fn api(&self) -> Api {
        Api::OpenAiCompletions
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn configured_api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    fn map_simple_options(&self, model: &Model, options: &SimpleStreamOptions) -> StreamOptions {
        let mut base = options.base.clone();
        let mut completions = base.vendor.openai_completions().cloned().unwrap_or_default();
        completions.reasoning_effort = simple::reasoning_effort(model, options);
        base.max_tokens = Some(simple::base_max_tokens(model, options));
        base.vendor = VendorOptions::OpenAiCompletions(completions);
        base
    }

    fn normalize_tool_call_id(&self, id: &str, _model: &Model) -> String {
        truncate_tool_call_id(id)
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
        debug!(model = %model.id, provider = %model.provider, "built chat completions request");
        Ok(ProviderRequest {
            provider: model.provider.clone(),
            url: self.config.completions_url(&model.base_url),
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
