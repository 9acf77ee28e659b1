use std::collections::BTreeMap;
use std::time::Duration;

use crate::env;
use crate::vendors::http::DEFAULT_TIMEOUT;

/// Configuration for the Bedrock Converse adapter.
#[derive(Clone, Debug)]
pub struct BedrockClientConfig {
    /// Bedrock API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Region used when a call does not name one.
    pub region: Option<String>,
    /// Overrides the runtime endpoint entirely (VPC endpoints, test servers).
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl Default for BedrockClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            region: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

pub(crate) fn runtime_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

/// Percent-encodes a model id or ARN for use as one path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(char::from(byte)),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

impl BedrockClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `AWS_BEARER_TOKEN_BEDROCK`. The region is left unset so the
    /// model's endpoint or `AWS_REGION` applies.
    pub fn from_env() -> Self {
        Self {
            api_key: env::get_env_api_key("amazon-bedrock"),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Endpoint precedence: configured base URL, explicit region (call, then
    /// config), the model's base URL, then the environment region.
    pub(crate) fn endpoint(&self, model_base_url: &str, call_region: Option<&str>) -> String {
        if let Some(base_url) = &self.base_url {
            return base_url.clone();
        }
        if let Some(region) = call_region.or(self.region.as_deref()) {
            return runtime_endpoint(region);
        }
        if !model_base_url.trim().is_empty() {
            return model_base_url.to_string();
        }
        runtime_endpoint(&env::aws_region())
    }

    pub(crate) fn converse_stream_url(&self, model_base_url: &str, model_id: &str, call_region: Option<&str>) -> String {
        let base = self.endpoint(model_base_url, call_region);
        format!(
            "{}/model/{}/converse-stream",
            base.trim_end_matches('/'),
            encode_path_segment(model_id)
        )
    }
}
