//! Public entry points.
//!
//! [`Harness`] pairs a [`ProviderRegistry`] with a [`ModelRegistry`] and
//! starts calls through `stream`, `stream_simple`, `complete` and
//! `complete_simple`. The free functions of the same names use
//! [`Harness::global`], a lazily built harness with every bundled adapter
//! registered from the environment.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::call;
use crate::errors::HarnessError;
use crate::event_stream::AssistantMessageEventStream;
use crate::model::Model;
use crate::models::ModelRegistry;
use crate::options::{SimpleStreamOptions, StreamOptions};
use crate::provider::ProviderAdapter;
use crate::registry::{ProviderRegistry, RegisterOptions};
use crate::types::{AssistantMessage, Context};
use crate::vendors;

static GLOBAL: OnceCell<Harness> = OnceCell::new();

/// Entry point for streaming calls: a provider registry plus a model catalog.
///
/// Cloning is cheap; clones share both registries.
#[derive(Clone)]
pub struct Harness {
    providers: Arc<ProviderRegistry>,
    models: Arc<ModelRegistry>,
}

impl Harness {
    /// Starts a builder for registering providers and models.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Process-wide harness with every built-in adapter (configured from the
    /// environment) and the built-in model catalog. Built on first use.
    pub fn global() -> Result<&'static Harness, HarnessError> {
        GLOBAL.get_or_try_init(|| {
            Harness::builder()
                .register_providers(vendors::builtin_providers()?)
                .with_builtin_models()
                .build()
        })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Catalog lookup by provider and model id.
    pub fn model(&self, provider: &str, model_id: &str) -> Option<Model> {
        self.models.get(provider, model_id)
    }

    /// Starts a call against the adapter registered for `model.api`.
    ///
    /// Errors here are start-time only (no adapter, disabled adapter,
    /// protocol mismatch, no runtime); everything after the task starts is
    /// reported as the stream's terminal `error` event.
    pub fn stream(
        &self,
        model: &Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream, HarnessError> {
        let adapter = self.providers.lookup(&model.api)?;
        Self::stream_with_adapter(adapter, model, context, options)
    }

    /// Like [`Harness::stream`] with options mapped by the adapter from the
    /// ergonomic [`SimpleStreamOptions`].
    pub fn stream_simple(
        &self,
        model: &Model,
        context: Context,
        options: SimpleStreamOptions,
    ) -> Result<AssistantMessageEventStream, HarnessError> {
        let adapter = self.providers.lookup(&model.api)?;
        let options = adapter.map_simple_options(model, &options);
        Self::stream_with_adapter(adapter, model, context, options)
    }

    /// Starts a call on an explicit adapter, bypassing the registry.
    pub fn stream_with_adapter(
        adapter: Arc<dyn ProviderAdapter>,
        model: &Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream, HarnessError> {
        let adapter_api = adapter.api();
        if adapter_api != model.api {
            return Err(HarnessError::ApiMismatch {
                model_api: model.api.clone(),
                adapter_api,
            });
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HarnessError::Config(
                "streaming requires a running tokio runtime".into(),
            ));
        }
        Ok(call::spawn_call(adapter, model.clone(), context, options))
    }

    /// Runs a call to its end and returns the final message. Failures after
    /// start come back as a message with `stop_reason` `error`/`aborted`.
    pub async fn complete(
        &self,
        model: &Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessage, HarnessError> {
        let stream = self.stream(model, context, options)?;
        stream.result().await.ok_or(HarnessError::StreamEnded)
    }

    pub async fn complete_simple(
        &self,
        model: &Model,
        context: Context,
        options: SimpleStreamOptions,
    ) -> Result<AssistantMessage, HarnessError> {
        let stream = self.stream_simple(model, context, options)?;
        stream.result().await.ok_or(HarnessError::StreamEnded)
    }
}

/// Builder used to register provider adapters and models before creating a
/// `Harness`.
#[derive(Default)]
pub struct HarnessBuilder {
    providers: Vec<(Arc<dyn ProviderAdapter>, RegisterOptions)>,
    models: Vec<Model>,
    builtin_models: bool,
}

impl HarnessBuilder {
    /// Registers a provider adapter under the protocol it declares.
    ///
    /// Register one adapter per protocol; duplicates fail [`build`](Self::build).
    pub fn register_provider(self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.register_provider_with(provider, RegisterOptions::default())
    }

    pub fn register_provider_with(
        mut self,
        provider: Arc<dyn ProviderAdapter>,
        options: RegisterOptions,
    ) -> Self {
        self.providers.push((provider, options));
        self
    }

    pub fn register_providers(
        mut self,
        providers: impl IntoIterator<Item = Arc<dyn ProviderAdapter>>,
    ) -> Self {
        for provider in providers {
            self = self.register_provider(provider);
        }
        self
    }

    /// Adds caller-defined models to the catalog; they win over built-ins
    /// with the same provider and id.
    pub fn with_models(mut self, models: impl IntoIterator<Item = Model>) -> Self {
        self.models.extend(models);
        self
    }

    pub fn with_builtin_models(mut self) -> Self {
        self.builtin_models = true;
        self
    }

    /// Builds the harness and validates provider registration (including duplicates).
    pub fn build(self) -> Result<Harness, HarnessError> {
        let providers = ProviderRegistry::new();
        for (provider, options) in self.providers {
            let api = provider.api();
            if providers.get(&api).is_some() {
                return Err(HarnessError::Config(format!(
                    "duplicate provider registration: {api}"
                )));
            }
            providers.register(provider, options)?;
        }

        let models = if self.builtin_models {
            ModelRegistry::with_builtins()
        } else {
            ModelRegistry::new()
        };
        for model in self.models {
            models.register(model);
        }

        Ok(Harness {
            providers: Arc::new(providers),
            models: Arc::new(models),
        })
    }
}

/// [`Harness::stream`] on the [global](Harness::global) harness.
pub fn stream(
    model: &Model,
    context: Context,
    options: StreamOptions,
) -> Result<AssistantMessageEventStream, HarnessError> {
    Harness::global()?.stream(model, context, options)
}

/// [`Harness::stream_simple`] on the [global](Harness::global) harness.
pub fn stream_simple(
    model: &Model,
    context: Context,
    options: SimpleStreamOptions,
) -> Result<AssistantMessageEventStream, HarnessError> {
    Harness::global()?.stream_simple(model, context, options)
}

/// [`Harness::complete`] on the [global](Harness::global) harness.
pub async fn complete(
    model: &Model,
    context: Context,
    options: StreamOptions,
) -> Result<AssistantMessage, HarnessError> {
    Harness::global()?.complete(model, context, options).await
}

/// [`Harness::complete_simple`] on the [global](Harness::global) harness.
pub async fn complete_simple(
    model: &Model,
    context: Context,
    options: SimpleStreamOptions,
) -> Result<AssistantMessage, HarnessError> {
    Harness::global()?.complete_simple(model, context, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::StubAdapter;
    use crate::types::{Api, Message, StopReason};

    #[test]
    fn build_rejects_duplicate_provider_apis() {
        let result = Harness::builder()
            .register_provider(StubAdapter::new(Api::AnthropicMessages))
            .register_provider(StubAdapter::new(Api::AnthropicMessages))
            .build();
        assert!(
            matches!(result, Err(HarnessError::Config(message)) if message.contains("duplicate provider"))
        );
    }

    #[test]
    fn caller_models_override_builtins() {
        let custom = Model::new("claude-sonnet-4-5", Api::AnthropicMessages, "anthropic", "http://proxy.local")
            .limits(1_000, 100);
        let harness = Harness::builder()
            .with_builtin_models()
            .with_models([custom])
            .build()
            .expect("harness");
        let model = harness.model("anthropic", "claude-sonnet-4-5").expect("model");
        assert_eq!(model.base_url, "http://proxy.local");
        assert!(harness.model("openai", "gpt-5").is_some());
        assert!(Harness::builder().build().expect("harness").model("openai", "gpt-5").is_none());
    }

    #[tokio::test]
    async fn start_time_failures_are_errors_not_events() {
        let harness = Harness::builder()
            .register_provider_with(
                StubAdapter::new(Api::OpenAiResponses),
                RegisterOptions::default().enabled(false),
            )
            .build()
            .expect("harness");
        let context = Context::new(vec![Message::user("hi")]);

        let unknown = harness.stream(&Model::test_model(), context.clone(), StreamOptions::default());
        assert!(matches!(unknown, Err(HarnessError::ProviderNotFound { .. })));

        let responses = Model::new("gpt-5", Api::OpenAiResponses, "openai", "https://api.openai.com/v1");
        let disabled = harness.stream(&responses, context.clone(), StreamOptions::default());
        assert!(matches!(disabled, Err(HarnessError::ProviderDisabled { .. })));

        let mismatch = Harness::stream_with_adapter(
            StubAdapter::new(Api::BedrockConverseStream),
            &responses,
            context,
            StreamOptions::default(),
        );
        assert!(matches!(
            mismatch,
            Err(HarnessError::ApiMismatch { adapter_api: Api::BedrockConverseStream, .. })
        ));
    }

    #[test]
    fn streaming_outside_a_runtime_is_a_config_error() {
        let result = Harness::stream_with_adapter(
            StubAdapter::new(Api::AnthropicMessages),
            &Model::test_model(),
            Context::default(),
            StreamOptions::default(),
        );
        assert!(matches!(result, Err(HarnessError::Config(_))));
    }

    #[tokio::test]
    async fn build_failures_after_start_resolve_as_error_messages() {
        let harness = Harness::builder()
            .register_provider(StubAdapter::new(Api::AnthropicMessages))
            .build()
            .expect("harness");
        let message = harness
            .complete(
                &Model::test_model(),
                Context::new(vec![Message::user("hi")]),
                StreamOptions::default().api_key("k"),
            )
            .await
            .expect("final message");
        assert_eq!(message.stop_reason, StopReason::Error);
        assert!(
            message
                .error_message
                .as_deref()
                .unwrap_or_default()
                .contains("stub adapter cannot build requests")
        );
    }
}
