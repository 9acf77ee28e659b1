//! Chat Completions SSE chunks to canonical stream operations.

use futures::StreamExt as _;
use serde_json::Value;

use crate::accumulator::BlockTracker;
use crate::errors::ProviderError;
use crate::provider::{ByteStream, StreamCall};
use crate::types::{BlockKind, StopReason, UsageUpdate};
use crate::vendors::{sse, token_count};

/// Delta fields vendors use for reasoning text, in lookup order.
const REASONING_FIELDS: [&str; 3] = ["reasoning_content", "reasoning", "reasoning_text"];

pub(crate) async fn read_stream(body: ByteStream, call: &mut StreamCall) -> Result<(), ProviderError> {
    let chunks = sse::json_events(call.provider().clone(), body);
    let mut chunks = std::pin::pin!(chunks);
    let mut decoder = ChunkDecoder::default();
    while let Some(chunk) = chunks.next().await {
        decoder.apply(&chunk?, call)?;
    }
    // Usage arrives in a trailing chunk, so the stream is read to its end.
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
            "stream ended without a finish reason",
        )),
    }
}

#[derive(Default)]
struct ChunkDecoder {
    /// Open text or thinking block.
    current: Option<(BlockKind, usize)>,
    tool_calls: BlockTracker<u64>,
    stop_reason: Option<StopReason>,
}

fn usage_update(usage: &Value) -> UsageUpdate {
    let cached = usage
        .pointer("/prompt_tokens_details/cached_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    UsageUpdate {
        input: token_count(usage, "prompt_tokens").map(|prompt| prompt.saturating_sub(cached)),
        output: token_count(usage, "completion_tokens"),
        cache_read: Some(cached),
        cache_write: Some(0),
        total_tokens: None,
    }
}

impl ChunkDecoder {
    /// Returns the open block of `kind`, closing any other text or thinking
    /// block first.
    fn switch_to(&mut self, kind: BlockKind, call: &mut StreamCall) -> Result<usize, ProviderError> {
        if let Some((open_kind, position)) = self.current {
            if open_kind == kind {
                return Ok(position);
            }
            call.end_block(position)?;
        }
        let position = match kind {
            BlockKind::Thinking => call.start_thinking(),
            _ => call.start_text(),
        };
        self.current = Some((kind, position));
        Ok(position)
    }

    fn close_current(&mut self, call: &mut StreamCall) -> Result<(), ProviderError> {
        match self.current.take() {
            Some((_, position)) => call.end_block(position),
            None => Ok(()),
        }
    }

    fn apply(&mut self, chunk: &Value, call: &mut StreamCall) -> Result<(), ProviderError> {
        if let Some(error) = chunk.get("error") {
            let kind = error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(Value::as_str);
            let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(ProviderError::from_stream_error(call.provider().clone(), kind, message));
        }
        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            call.set_usage(usage_update(usage));
        }
        let Some(choice) = chunk.pointer("/choices/0") else {
            return Ok(());
        };

        if let Some(delta) = choice.get("delta") {
            if let Some((field, text)) = REASONING_FIELDS.iter().find_map(|field| {
                delta
                    .get(*field)
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .map(|text| (*field, text))
            }) {
                let fresh = !matches!(self.current, Some((BlockKind::Thinking, _)));
                let position = self.switch_to(BlockKind::Thinking, call)?;
                if fresh {
                    call.thinking_signature(position, field)?;
                }
                call.thinking_delta(position, text)?;
            }
            if let Some(text) = delta.get("content").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                let position = self.switch_to(BlockKind::Text, call)?;
                call.text_delta(position, text)?;
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tool_call in tool_calls {
                    self.tool_call_delta(tool_call, call)?;
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.stop_reason = Some(match reason {
                "stop" | "end" => StopReason::Stop,
                "length" => StopReason::Length,
                "tool_calls" | "function_call" => StopReason::ToolUse,
                "content_filter" => {
                    return Err(ProviderError::ContentFiltered {
                        provider: call.provider().clone(),
                        message: "generation stopped by the content filter".into(),
                    });
                }
                other => {
                    return Err(ProviderError::protocol(
                        call.provider().clone(),
                        format!("unhandled finish reason: {other}"),
                    ));
                }
            });
        }
        Ok(())
    }

    fn tool_call_delta(&mut self, tool_call: &Value, call: &mut StreamCall) -> Result<(), ProviderError> {
        let index = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let position = match self.tool_calls.resolve(&index) {
            Some(position) => position,
            None => {
                self.close_current(call)?;
                let id = tool_call
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("call_{index}"), ToOwned::to_owned);
                let name = tool_call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let position = call.start_tool_call(id, name);
                self.tool_calls.open(index, position);
                position
            }
        };
        if let Some(arguments) = tool_call
            .pointer("/function/arguments")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
        {
            call.tool_call_delta(position, arguments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AssistantMessageEvent;
    use crate::event_stream::AssistantMessageEventStream;
    use crate::model::Model;
    use crate::types::{Api, ContentBlock};
    use crate::vendors::sse::sse_body;
    use serde_json::json;

    fn call() -> StreamCall {
        let model = Model::new("llama", Api::OpenAiCompletions, "groq", "https://api.groq.com/openai/v1");
        StreamCall::new(&model, AssistantMessageEventStream::assistant())
    }

    fn delta(delta: Value) -> (Option<&'static str>, Value) {
        (None, json!({"choices": [{"index": 0, "delta": delta}]}))
    }

    #[tokio::test]
    async fn reasoning_then_text_then_usage() {
        let mut call = call();
        let body = sse_body(&[
            delta(json!({"role": "assistant", "reasoning_content": "think"})),
            delta(json!({"reasoning_content": "ing"})),
            delta(json!({"content": "Hello"})),
            (None, json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})),
            (None, json!({"choices": [], "usage": {"prompt_tokens": 30, "completion_tokens": 7, "prompt_tokens_details": {"cached_tokens": 10}}})),
        ]);
        read_stream(body, &mut call).await.expect("stream");
        let message = call.message();
        match &message.content[0] {
            ContentBlock::Thinking(t) => {
                assert_eq!(t.thinking, "thinking");
                assert_eq!(t.signature.as_deref(), Some("reasoning_content"));
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(message.text(), "Hello");
        assert_eq!(message.stop_reason, StopReason::Stop);
        assert_eq!((message.usage.input, message.usage.cache_read, message.usage.output), (20, 10, 7));
        // The thinking block closed when text started; the text block is
        // left for the driver to close.
        assert!(!call.is_open(0));
        assert!(call.is_open(1));
    }

    #[tokio::test]
    async fn parallel_tool_calls_accumulate_by_index() {
        let mut call = call();
        let body = sse_body(&[
            delta(json!({"tool_calls": [{"index": 0, "id": "call_a", "function": {"name": "ls", "arguments": ""}}]})),
            delta(json!({"tool_calls": [{"index": 1, "id": "call_b", "function": {"name": "cat", "arguments": "{\"f\":"}}]})),
            delta(json!({"tool_calls": [{"index": 0, "function": {"arguments": "{}"}}]})),
            delta(json!({"tool_calls": [{"index": 1, "function": {"arguments": "\"x\"}"}}]})),
            (None, json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]})),
        ]);
        read_stream(body, &mut call).await.expect("stream");
        call.end_open_blocks().expect("close");
        let calls: Vec<_> = call.message().tool_calls().cloned().collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].arguments, json!({"f": "x"}));
        assert_eq!(call.message().stop_reason, StopReason::ToolUse);
        let ends = call
            .events()
            .history()
            .iter()
            .filter(|e| matches!(e, AssistantMessageEvent::ToolCallEnd { .. }))
            .count();
        assert_eq!(ends, 2);
    }

    #[tokio::test]
    async fn content_filter_is_an_error() {
        let mut call = call();
        let body = sse_body(&[(None, json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "content_filter"}]}))]);
        let err = read_stream(body, &mut call).await.expect_err("filtered");
        assert!(matches!(err, ProviderError::ContentFiltered { .. }));
    }

    #[tokio::test]
    async fn in_stream_error_objects_are_raised() {
        let mut call = call();
        let body = sse_body(&[(None, json!({"error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}}))]);
        let err = read_stream(body, &mut call).await.expect_err("error");
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn missing_finish_reason_is_an_error() {
        let mut call = call();
        let body = sse_body(&[delta(json!({"content": "cut"}))]);
        assert!(read_stream(body, &mut call).await.is_err());
    }
}
