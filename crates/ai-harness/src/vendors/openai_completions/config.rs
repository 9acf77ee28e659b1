use std::collections::BTreeMap;
use std::time::Duration;

use crate::vendors::http::DEFAULT_TIMEOUT;

/// Configuration for the Chat Completions adapter.
///
/// One adapter serves every compatible vendor, so the API key is normally
/// resolved per call from the model's provider (`GROQ_API_KEY`,
/// `XAI_API_KEY`, ...). A key set here applies to all of them.
#[derive(Clone, Debug)]
pub struct OpenAiCompletionsClientConfig {
    pub api_key: Option<String>,
    /// Overrides the model's base URL.
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl Default for OpenAiCompletionsClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl OpenAiCompletionsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys come from each model's provider environment variables.
    pub fn from_env() -> Self {
        Self::default()
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

    pub(crate) fn completions_url(&self, model_base_url: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(model_base_url);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}
