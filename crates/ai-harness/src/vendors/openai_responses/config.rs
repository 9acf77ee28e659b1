use std::collections::BTreeMap;
use std::time::Duration;

use crate::env;
use crate::vendors::http::DEFAULT_TIMEOUT;

/// Configuration for the OpenAI Responses adapter.
#[derive(Clone, Debug)]
pub struct OpenAiResponsesClientConfig {
    /// API key used for bearer auth when a call does not pass one.
    pub api_key: Option<String>,
    /// Overrides the model's base URL.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: Option<String>,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl Default for OpenAiResponsesClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl OpenAiResponsesClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            api_key: env::get_env_api_key("openai"),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn responses_url(&self, model_base_url: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(model_base_url);
        format!("{}/responses", base.trim_end_matches('/'))
    }
}
