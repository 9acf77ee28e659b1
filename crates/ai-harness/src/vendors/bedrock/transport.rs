//! ConverseStream event frames to canonical stream operations.

use futures::StreamExt as _;
use serde_json::Value;

use crate::accumulator::BlockTracker;
use crate::errors::ProviderError;
use crate::provider::{ByteStream, StreamCall};
use crate::types::{StopReason, UsageUpdate};
use crate::vendors::{NULL, token_count};

use super::eventstream::{self, Frame};

pub(crate) async fn read_stream(body: ByteStream, call: &mut StreamCall) -> Result<(), ProviderError> {
    let frames = eventstream::frames(call.provider().clone(), body);
    let mut frames = std::pin::pin!(frames);
    let mut decoder = ConverseDecoder::default();
    while let Some(frame) = frames.next().await {
        decoder.apply(&frame?, call)?;
    }
    // `metadata` (usage) follows `messageStop`, so the body is read to its end.
    match decoder.stop_reason {
        Some(StopReason::Stop) if call.has_tool_calls() => {
            call.set_stop_reason(StopReason::ToolUse);
            Ok(())
        }
        Some(reason) => {
            call.set_stop_reason(reason);
            Ok(())
        }
        None => Err(ProviderError::network(
            call.provider().clone(),
            "stream ended before messageStop",
        )),
    }
}

#[derive(Default)]
struct ConverseDecoder {
    blocks: BlockTracker<u64>,
    stop_reason: Option<StopReason>,
}

fn exception_error(call: &StreamCall, kind: &str, message: String) -> ProviderError {
    let provider = call.provider().clone();
    match kind {
        "internalServerException" | "modelStreamErrorException" => ProviderError::ServiceUnavailable {
            provider,
            message,
            status_code: None,
        },
        "modelTimeoutException" => ProviderError::Timeout { provider, message },
        "accessDeniedException" => ProviderError::AuthenticationFailed { provider, message },
        other => ProviderError::from_stream_error(provider, Some(other), message),
    }
}

fn usage_update(usage: &Value) -> UsageUpdate {
    UsageUpdate {
        input: token_count(usage, "inputTokens"),
        output: token_count(usage, "outputTokens"),
        cache_read: Some(token_count(usage, "cacheReadInputTokens").unwrap_or(0)),
        cache_write: Some(token_count(usage, "cacheWriteInputTokens").unwrap_or(0)),
        total_tokens: token_count(usage, "totalTokens"),
    }
}

impl ConverseDecoder {
    fn apply(&mut self, frame: &Frame, call: &mut StreamCall) -> Result<(), ProviderError> {
        let payload: Value = if frame.payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&frame.payload).map_err(|e| {
                ProviderError::protocol(call.provider().clone(), format!("invalid event payload: {e}"))
            })?
        };

        match frame.header(":message-type").unwrap_or("event") {
            "event" => {}
            "exception" => {
                let kind = frame.header(":exception-type").unwrap_or("unknownException");
                let message = payload
                    .get("message")
                    .or_else(|| payload.get("Message"))
                    .and_then(Value::as_str)
                    .unwrap_or(kind)
                    .to_string();
                return Err(exception_error(call, kind, message));
            }
            other => {
                let code = frame.header(":error-code");
                let message = frame.header(":error-message").unwrap_or(other).to_string();
                return Err(ProviderError::from_stream_error(call.provider().clone(), code, message));
            }
        }

        let index = payload.get("contentBlockIndex").and_then(Value::as_u64).unwrap_or(0);
        match frame.header(":event-type").unwrap_or_default() {
            "messageStart" => {}
            "contentBlockStart" => {
                if let Some(tool_use) = payload.pointer("/start/toolUse") {
                    let id = tool_use.get("toolUseId").and_then(Value::as_str).unwrap_or_default();
                    let name = tool_use.get("name").and_then(Value::as_str).unwrap_or_default();
                    let position = call.start_tool_call(id, name);
                    self.blocks.open(index, position);
                }
            }
            "contentBlockDelta" => self.delta(index, payload.get("delta").unwrap_or(&NULL), call)?,
            "contentBlockStop" => {
                if let Some(position) = self.blocks.close(&index) {
                    call.end_block(position)?;
                }
            }
            "messageStop" => {
                let reason = payload.get("stopReason").and_then(Value::as_str).unwrap_or_default();
                self.stop_reason = Some(match reason {
                    "end_turn" | "stop_sequence" => StopReason::Stop,
                    "max_tokens" | "model_context_window_exceeded" => StopReason::Length,
                    "tool_use" => StopReason::ToolUse,
                    "guardrail_intervened" | "content_filtered" => {
                        return Err(ProviderError::ContentFiltered {
                            provider: call.provider().clone(),
                            message: format!("generation stopped: {reason}"),
                        });
                    }
                    other => {
                        return Err(ProviderError::protocol(
                            call.provider().clone(),
                            format!("unhandled stop reason: {other}"),
                        ));
                    }
                });
            }
            "metadata" => {
                if let Some(usage) = payload.get("usage").filter(|u| u.is_object()) {
                    call.set_usage(usage_update(usage));
                }
            }
            other => tracing::debug!(event_type = other, "ignoring converse event"),
        }
        Ok(())
    }

    /// Text and reasoning blocks have no start event; their first delta
    /// opens them.
    fn delta(&mut self, index: u64, delta: &Value, call: &mut StreamCall) -> Result<(), ProviderError> {
        if let Some(text) = delta.get("text").and_then(Value::as_str) {
            let position = match self.blocks.resolve(&index) {
                Some(position) => position,
                None => {
                    let position = call.start_text();
                    self.blocks.open(index, position);
                    position
                }
            };
            return call.text_delta(position, text);
        }
        if let Some(input) = delta.pointer("/toolUse/input").and_then(Value::as_str) {
            let position = self.blocks.resolve(&index).ok_or_else(|| {
                ProviderError::protocol(call.provider().clone(), format!("tool input for unknown block {index}"))
            })?;
            return call.tool_call_delta(position, input);
        }
        if let Some(reasoning) = delta.get("reasoningContent") {
            if let Some(data) = reasoning.get("redactedContent").and_then(Value::as_str) {
                call.push_redacted_thinking(data);
                return Ok(());
            }
            let position = match self.blocks.resolve(&index) {
                Some(position) => position,
                None => {
                    let position = call.start_thinking();
                    self.blocks.open(index, position);
                    position
                }
            };
            if let Some(text) = reasoning.get("text").and_then(Value::as_str) {
                call.thinking_delta(position, text)?;
            }
            if let Some(signature) = reasoning.get("signature").and_then(Value::as_str) {
                call.thinking_signature(position, signature)?;
            }
        }
        Ok(())
    }
}
