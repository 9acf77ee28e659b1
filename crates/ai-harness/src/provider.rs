//! Adapter contract implemented by every vendor integration.
//!
//! The call driver (`crate::call`) owns sequencing: it resolves the key,
//! transforms history, builds and sends the request under the retry policy,
//! hands the response body to [`ProviderAdapter::execute_stream`] and routes
//! the terminal event. Adapters only translate: canonical context to a vendor
//! payload, and vendor wire events to [`StreamCall`] operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::RwLockReadGuard;

use bytes::Bytes;
use futures::Stream;

use crate::accumulator::StreamState;
use crate::env;
use crate::errors::ProviderError;
use crate::event_stream::AssistantMessageEventStream;
use crate::model::{Model, ProviderId};
use crate::options::{SimpleStreamOptions, StreamOptions};
use crate::partial_json;
use crate::types::{
    Api, AssistantMessage, BlockKind, ContentBlock, Context, StopReason, ThinkingContent,
    ToolCall, UsageUpdate,
};
use crate::vendors::http;

/// Response body of a streaming request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send + 'static>>;

/// A vendor request ready to send.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub provider: ProviderId,
    pub url: String,
    /// Final header set (model headers, adapter defaults, auth, caller
    /// overrides in that order).
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

/// One vendor protocol implementation.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Protocol this adapter speaks; the registry key.
    fn api(&self) -> Api;

    /// HTTP client used by the default [`send_request`](Self::send_request).
    fn http_client(&self) -> &reqwest::Client;

    /// API key configured on the adapter itself, if any.
    fn configured_api_key(&self) -> Option<&str> {
        None
    }

    /// Key for one call: explicit option, then adapter config, then the
    /// provider's environment variables.
    fn resolve_api_key(&self, model: &Model, options: &StreamOptions) -> Option<String> {
        options
            .api_key
            .as_deref()
            .or(self.configured_api_key())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| env::get_env_api_key(model.provider.as_str()))
    }

    /// Maps ergonomic options onto this adapter's vendor options.
    fn map_simple_options(&self, _model: &Model, options: &SimpleStreamOptions) -> StreamOptions {
        options.base.clone()
    }

    /// Rewrites tool-call ids produced by other vendors into a form this
    /// vendor accepts. Identity by default.
    fn normalize_tool_call_id(&self, id: &str, _model: &Model) -> String {
        id.to_string()
    }

    /// Per-call setup before the request is built.
    async fn initialize(&self, _model: &Model, _options: &StreamOptions) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Builds the vendor payload. `context` has already been transformed for
    /// `model`. Must not perform I/O.
    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
        api_key: &str,
    ) -> Result<ProviderRequest, ProviderError>;

    /// Opens the streaming response.
    async fn send_request(
        &self,
        request: &ProviderRequest,
        options: &StreamOptions,
    ) -> Result<ByteStream, ProviderError> {
        http::send_streaming(self.http_client(), request, options.signal.as_ref()).await
    }

    /// Translates the response body into canonical events on `call`.
    ///
    /// Returning `Ok` means the vendor reported a normal end; open blocks are
    /// closed and `done` is emitted by the driver. Any `Err` becomes a
    /// terminal `error` event.
    async fn execute_stream(
        &self,
        body: ByteStream,
        options: &StreamOptions,
        call: &mut StreamCall,
    ) -> Result<(), ProviderError>;

    /// Runs after every call, successful or not.
    async fn cleanup(&self, _model: &Model) {}
}

/// Per-call emitter handed to [`ProviderAdapter::execute_stream`].
///
/// Every operation mutates the accumulator first and then pushes the matching
/// canonical event carrying a handle to the live message, so event order is
/// wire order.
/// Transient decode state (raw tool-argument text, open-block set) is kept
/// beside the message and never written into it.
pub struct StreamCall {
    state: StreamState,
    events: AssistantMessageEventStream,
    provider: ProviderId,
    open: BTreeSet<usize>,
    tool_arguments: HashMap<usize, String>,
}

impl StreamCall {
    pub fn new(model: &Model, events: AssistantMessageEventStream) -> Self {
        Self {
            state: StreamState::new(model),
            events,
            provider: model.provider.clone(),
            open: BTreeSet::new(),
            tool_arguments: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    pub(crate) fn events(&self) -> &AssistantMessageEventStream {
        &self.events
    }

    /// Read access to the message under construction.
    pub fn message(&self) -> RwLockReadGuard<'_, AssistantMessage> {
        self.state.message()
    }

    fn protocol_error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::protocol(self.provider.clone(), message)
    }

    /// Checks that `index` is an open block of `kind`.
    fn expect_open(&self, index: usize, kind: BlockKind) -> Result<(), ProviderError> {
        if !self.open.contains(&index) {
            return Err(self.protocol_error(format!("no open block at content index {index}")));
        }
        match self.state.block_kind(index) {
            Some(found) if found == kind => Ok(()),
            found => Err(self.protocol_error(format!(
                "expected {kind:?} block at content index {index}, found {found:?}"
            ))),
        }
    }

    pub(crate) fn emit_start(&self) {
        self.events.push_start(self.state.partial());
    }

    pub fn start_text(&mut self) -> usize {
        let index = self.state.push_block(ContentBlock::text(""));
        self.open.insert(index);
        self.events.push_text_start(index, self.state.partial());
        index
    }

    pub fn text_delta(&mut self, index: usize, delta: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::Text)?;
        self.state.update_block(index, |block| {
            if let ContentBlock::Text(text) = block {
                text.text.push_str(delta);
            }
        });
        self.events
            .push_text_delta(index, delta.to_string(), self.state.partial());
        Ok(())
    }

    pub fn end_text(&mut self, index: usize) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::Text)?;
        self.open.remove(&index);
        let content = match self.state.message().content.get(index) {
            Some(ContentBlock::Text(text)) => text.text.clone(),
            _ => String::new(),
        };
        self.events.push_text_end(index, content, self.state.partial());
        Ok(())
    }

    pub fn start_thinking(&mut self) -> usize {
        let index = self.state.push_block(ContentBlock::thinking("", None));
        self.open.insert(index);
        self.events.push_thinking_start(index, self.state.partial());
        index
    }

    /// Emits a complete redacted-thinking block (start and end) carrying the
    /// vendor's encrypted payload.
    pub fn push_redacted_thinking(&mut self, payload: impl Into<String>) -> usize {
        let index = self.state.push_block(ContentBlock::Thinking(ThinkingContent {
            thinking: String::new(),
            signature: Some(payload.into()),
            redacted: true,
        }));
        self.events.push_thinking_start(index, self.state.partial());
        self.events
            .push_thinking_end(index, String::new(), self.state.partial());
        index
    }

    pub fn thinking_delta(&mut self, index: usize, delta: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::Thinking)?;
        self.state.update_block(index, |block| {
            if let ContentBlock::Thinking(thinking) = block {
                thinking.thinking.push_str(delta);
            }
        });
        self.events
            .push_thinking_delta(index, delta.to_string(), self.state.partial());
        Ok(())
    }

    /// Appends to the block's signature (vendors stream it in pieces).
    pub fn thinking_signature(&mut self, index: usize, signature: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::Thinking)?;
        self.state.update_block(index, |block| {
            if let ContentBlock::Thinking(thinking) = block {
                thinking
                    .signature
                    .get_or_insert_with(String::new)
                    .push_str(signature);
            }
        });
        Ok(())
    }

    pub fn end_thinking(&mut self, index: usize) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::Thinking)?;
        self.open.remove(&index);
        let content = match self.state.message().content.get(index) {
            Some(ContentBlock::Thinking(thinking)) => thinking.thinking.clone(),
            _ => String::new(),
        };
        self.events
            .push_thinking_end(index, content, self.state.partial());
        Ok(())
    }

    pub fn start_tool_call(&mut self, id: impl Into<String>, name: impl Into<String>) -> usize {
        let index = self
            .state
            .push_block(ContentBlock::ToolCall(ToolCall::new(id, name)));
        self.open.insert(index);
        self.tool_arguments.insert(index, String::new());
        self.events.push_tool_call_start(index, self.state.partial());
        index
    }

    /// Appends raw argument text and refreshes the best-effort parse.
    pub fn tool_call_delta(&mut self, index: usize, delta: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::ToolCall)?;
        let raw = self.tool_arguments.entry(index).or_default();
        raw.push_str(delta);
        let arguments = partial_json::parse_streaming_arguments(raw);
        self.state.update_block(index, |block| {
            if let ContentBlock::ToolCall(call) = block {
                call.arguments = arguments;
            }
        });
        self.events
            .push_tool_call_delta(index, delta.to_string(), self.state.partial());
        Ok(())
    }

    /// Replaces the accumulated argument text (vendors that announce a call
    /// with its arguments, or resend them in full on completion). No event is
    /// emitted.
    pub fn set_tool_call_arguments(&mut self, index: usize, raw: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::ToolCall)?;
        let arguments = partial_json::parse_streaming_arguments(raw);
        self.tool_arguments.insert(index, raw.to_string());
        self.state.update_block(index, |block| {
            if let ContentBlock::ToolCall(call) = block {
                call.arguments = arguments;
            }
        });
        Ok(())
    }

    /// Attaches vendor continuation data to an open tool call.
    pub fn tool_call_signature(&mut self, index: usize, signature: &str) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::ToolCall)?;
        self.state.update_block(index, |block| {
            if let ContentBlock::ToolCall(call) = block {
                call.thought_signature = Some(signature.to_string());
            }
        });
        Ok(())
    }

    /// Closes a tool call, re-parsing the complete argument text.
    pub fn end_tool_call(&mut self, index: usize) -> Result<(), ProviderError> {
        self.expect_open(index, BlockKind::ToolCall)?;
        self.open.remove(&index);
        let raw = self.tool_arguments.remove(&index).unwrap_or_default();
        let outcome = partial_json::parse_final_arguments(&raw);
        if let Some(error) = &outcome.error {
            tracing::debug!(
                provider = %self.provider,
                content_index = index,
                error = %error,
                "tool call arguments did not parse; keeping best-effort value"
            );
        }
        let finished = self.state.update_block(index, |block| match block {
            ContentBlock::ToolCall(call) => {
                call.arguments = outcome.value;
                Some(call.clone())
            }
            _ => None,
        });
        if let Some(tool_call) = finished.flatten() {
            self.events
                .push_tool_call_end(index, tool_call, self.state.partial());
        }
        Ok(())
    }

    /// Closes an open block of any kind.
    pub fn end_block(&mut self, index: usize) -> Result<(), ProviderError> {
        match self.state.block_kind(index) {
            Some(BlockKind::Text) => self.end_text(index),
            Some(BlockKind::Thinking) => self.end_thinking(index),
            Some(BlockKind::ToolCall) => self.end_tool_call(index),
            None => Err(self.protocol_error(format!("no block at content index {index}"))),
        }
    }

    /// Closes every open block in content order.
    pub fn end_open_blocks(&mut self) -> Result<(), ProviderError> {
        let open: Vec<usize> = self.open.iter().copied().collect();
        for index in open {
            self.end_block(index)?;
        }
        Ok(())
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.open.contains(&index)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.state.message().tool_calls().next().is_some()
    }

    pub fn set_usage(&mut self, update: UsageUpdate) {
        self.state.set_usage(update);
    }

    pub fn set_cost_multiplier(&mut self, multiplier: f64) {
        self.state.set_cost_multiplier(multiplier);
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.state.set_stop_reason(reason);
    }

    /// Drops transient decode state after a failure so the partial message
    /// can be stored as history as-is.
    pub(crate) fn discard_bookkeeping(&mut self) {
        self.open.clear();
        self.tool_arguments.clear();
    }
}
