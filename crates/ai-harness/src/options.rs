//! Per-call options, cancellation and vendor option variants.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::retry::RetryPolicy;
use crate::types::{ThinkingBudgets, ThinkingLevel};
use crate::vendors::anthropic::AnthropicOptions;
use crate::vendors::bedrock::BedrockOptions;
use crate::vendors::openai_completions::OpenAiCompletionsOptions;
use crate::vendors::openai_responses::OpenAiResponsesOptions;

/// Handle used to cancel in-flight calls.
///
/// Cancellation is cooperative: the call observes the signal while opening the
/// request, between retries and while reading the body, then ends with an
/// `error` event whose stop reason is `aborted`.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Signal to pass in [`StreamOptions::signal`].
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle aborts. Never resolves if every handle is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Observer for the exact request payload sent to a vendor.
#[derive(Clone)]
pub struct PayloadHook(Arc<dyn Fn(&serde_json::Value) + Send + Sync>);

impl PayloadHook {
    pub fn new(hook: impl Fn(&serde_json::Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    /// Invokes the hook. A panicking hook is contained and ignored.
    pub fn call(&self, payload: &serde_json::Value) {
        if catch_unwind(AssertUnwindSafe(|| (self.0)(payload))).is_err() {
            tracing::debug!("payload hook panicked; ignoring");
        }
    }
}

impl fmt::Debug for PayloadHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadHook")
    }
}

/// Prompt-cache retention requested from vendors that support it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheRetention {
    None,
    #[default]
    Short,
    Long,
}

/// Which tool the model may (or must) call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    /// The model must call some tool.
    Required,
    /// The model must call the named tool.
    Tool(String),
}

/// OpenAI reasoning effort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    #[serde(rename = "xhigh")]
    XHigh,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }

    /// Effort for a provider-neutral level; `None` when thinking is off.
    pub fn from_level(level: ThinkingLevel) -> Option<Self> {
        match level {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal => Some(Self::Minimal),
            ThinkingLevel::Low => Some(Self::Low),
            ThinkingLevel::Medium => Some(Self::Medium),
            ThinkingLevel::High => Some(Self::High),
            ThinkingLevel::XHigh => Some(Self::XHigh),
        }
    }
}

/// Reasoning summary verbosity for the Responses API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    #[default]
    Auto,
    Concise,
    Detailed,
}

/// Vendor-specific options. An adapter reads only its own variant and
/// ignores the others.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum VendorOptions {
    #[default]
    None,
    Anthropic(AnthropicOptions),
    OpenAiResponses(OpenAiResponsesOptions),
    OpenAiCompletions(OpenAiCompletionsOptions),
    Bedrock(BedrockOptions),
}

impl VendorOptions {
    pub fn anthropic(&self) -> Option<&AnthropicOptions> {
        match self {
            Self::Anthropic(options) => Some(options),
            _ => None,
        }
    }

    pub fn openai_responses(&self) -> Option<&OpenAiResponsesOptions> {
        match self {
            Self::OpenAiResponses(options) => Some(options),
            _ => None,
        }
    }

    pub fn openai_completions(&self) -> Option<&OpenAiCompletionsOptions> {
        match self {
            Self::OpenAiCompletions(options) => Some(options),
            _ => None,
        }
    }

    pub fn bedrock(&self) -> Option<&BedrockOptions> {
        match self {
            Self::Bedrock(options) => Some(options),
            _ => None,
        }
    }
}

/// Options for [`crate::Harness::stream`].
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Takes precedence over the adapter config and the environment.
    pub api_key: Option<String>,
    /// Used as a prompt-cache key by vendors that support one.
    pub session_id: Option<String>,
    /// Extra HTTP headers, applied after model and adapter headers.
    pub headers: BTreeMap<String, String>,
    pub signal: Option<AbortSignal>,
    pub on_payload: Option<PayloadHook>,
    /// Overrides the default retry policy. Ignored when `signal` is set.
    pub retry: Option<RetryPolicy>,
    pub max_retry_delay_ms: Option<u64>,
    pub cache_retention: CacheRetention,
    pub vendor: VendorOptions,
}

impl StreamOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn on_payload(mut self, hook: impl Fn(&serde_json::Value) + Send + Sync + 'static) -> Self {
        self.on_payload = Some(PayloadHook::new(hook));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn cache_retention(mut self, retention: CacheRetention) -> Self {
        self.cache_retention = retention;
        self
    }

    pub fn vendor(mut self, vendor: VendorOptions) -> Self {
        self.vendor = vendor;
        self
    }

    /// Retry policy for opening the stream: single attempt whenever a
    /// cancellation signal is attached.
    pub(crate) fn effective_retry_policy(&self) -> RetryPolicy {
        let mut policy = self.retry.clone().unwrap_or_default();
        if let Some(max) = self.max_retry_delay_ms {
            policy = policy.with_max_delay_ms(max);
        }
        if self.signal.is_some() {
            policy = policy.single_attempt();
        }
        policy
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }
}

/// Ergonomic options for [`crate::Harness::stream_simple`]; each adapter maps
/// them onto its own [`VendorOptions`] variant.
#[derive(Clone, Debug, Default)]
pub struct SimpleStreamOptions {
    pub base: StreamOptions,
    pub reasoning: Option<ThinkingLevel>,
    /// Overrides the default token budgets for budget-based vendors.
    pub thinking_budgets: Option<ThinkingBudgets>,
}

impl SimpleStreamOptions {
    pub fn reasoning(mut self, level: ThinkingLevel) -> Self {
        self.reasoning = Some(level);
        self
    }

    pub fn thinking_budgets(mut self, budgets: ThinkingBudgets) -> Self {
        self.thinking_budgets = Some(budgets);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.base.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.base.max_tokens = Some(max_tokens);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.base.api_key = Some(api_key.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.base.session_id = Some(session_id.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.base.signal = Some(signal);
        self
    }

    /// Requested level, `None` when reasoning is off or unset.
    pub(crate) fn thinking_level(&self) -> Option<ThinkingLevel> {
        self.reasoning.filter(|level| level.is_enabled())
    }
}

impl From<StreamOptions> for SimpleStreamOptions {
    fn from(base: StreamOptions) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }
}
