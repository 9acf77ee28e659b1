use std::collections::BTreeMap;
use std::time::Duration;

use crate::env;
use crate::vendors::http::DEFAULT_TIMEOUT;

/// Configuration for the Anthropic Messages adapter.
#[derive(Clone, Debug)]
pub struct AnthropicClientConfig {
    /// Key used when a call does not pass one. OAuth tokens (`sk-ant-oat…`)
    /// switch the adapter to bearer auth.
    pub api_key: Option<String>,
    /// Overrides the model's base URL (proxies, test servers).
    pub base_url: Option<String>,
    /// HTTP timeout for the whole request, body included.
    pub timeout: Duration,
    /// Headers added to every request before per-call overrides.
    pub headers: BTreeMap<String, String>,
}

impl Default for AnthropicClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl AnthropicClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `ANTHROPIC_OAUTH_TOKEN`, then `ANTHROPIC_API_KEY`.
    ///
    /// A missing key is not an error here: it surfaces per call, after the
    /// call-level option has had a chance to supply one.
    pub fn from_env() -> Self {
        Self {
            api_key: env::get_env_api_key("anthropic"),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
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

    pub(crate) fn messages_url(&self, model_base_url: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(model_base_url);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}
