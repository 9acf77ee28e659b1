//! Streaming LLM harness that normalizes vendor protocols into one event
//! model.
//!
//! Every call yields an [`AssistantMessageEventStream`]: `start`, per-block
//! `*_start`/`*_delta`/`*_end` events and exactly one terminal `done` or
//! `error`, whatever the vendor's wire format. Vendor-specific APIs are
//! namespaced under `vendors::*`.
//!
//! # Builder-first usage (Anthropic)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ai_harness::prelude::*;
//! use ai_harness::vendors::anthropic::AnthropicProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let harness = Harness::builder()
//!     .register_provider(Arc::new(AnthropicProvider::from_env()?))
//!     .with_builtin_models()
//!     .build()?;
//!
//! let model = harness
//!     .model("anthropic", "claude-haiku-4-5")
//!     .ok_or_else(|| HarnessError::Validation("unknown model".into()))?;
//! let context = Context::new(vec![Message::user("Say hello")]).system_prompt("Answer briefly.");
//!
//! let stream = harness.stream(&model, context, StreamOptions::default())?;
//! while let Some(event) = stream.next().await {
//!     if let AssistantMessageEvent::TextDelta { delta, .. } = event {
//!         print!("{delta}");
//!     }
//! }
//! let message = stream.result().await.ok_or(HarnessError::StreamEnded)?;
//! println!("\n[{:?}] {} output tokens", message.stop_reason, message.usage.output);
//! # Ok(())
//! # }
//! ```

/// Per-call accumulator and wire-index bookkeeping.
pub mod accumulator;
mod call;
/// API-key and region lookup from the environment.
pub mod env;
/// Public error types used by the harness API.
pub mod errors;
/// Canonical stream events.
pub mod event;
/// Push/pull event channel with a deferred final result.
pub mod event_stream;
/// Harness entry point and builder.
pub mod harness;
/// Model descriptors and provider identifiers.
pub mod model;
/// Built-in model catalog and cost calculation.
pub mod models;
pub mod observability;
/// Per-call options and cancellation.
pub mod options;
/// Context-overflow detection.
pub mod overflow;
/// Tolerant parser for streamed tool-call arguments.
pub mod partial_json;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// Provider registry keyed by wire protocol.
pub mod registry;
/// Retry/backoff executor and error classification.
pub mod retry;
/// Cross-model history transformation.
pub mod transform;
/// Canonical messages, content blocks and usage.
pub mod types;
/// Vendor-specific integrations.
pub mod vendors;

pub use accumulator::PartialMessage;
pub use errors::{HarnessError, ProviderError, TransformError};
pub use event::AssistantMessageEvent;
pub use event_stream::{AssistantMessageEventStream, EventStream};
pub use harness::{Harness, HarnessBuilder, complete, complete_simple, stream, stream_simple};
pub use model::{Model, ModelCost, ProviderId};
pub use models::{ModelRegistry, ServiceTier, calculate_cost};
pub use observability::init_observability;
pub use options::{
    AbortHandle, AbortSignal, CacheRetention, SimpleStreamOptions, StreamOptions, ToolChoice,
    VendorOptions,
};
pub use overflow::{get_overflow_suggestion, is_context_overflow};
pub use provider::{ByteStream, ProviderAdapter, ProviderRequest, StreamCall};
pub use registry::{ProviderRegistry, RegisterOptions, RegisteredProvider};
pub use retry::{ErrorCode, NormalizedError, RetryPolicy, execute_with_retry};
