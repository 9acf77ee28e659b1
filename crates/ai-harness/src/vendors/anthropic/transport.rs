//! Messages API SSE events to canonical stream operations.

use futures::StreamExt as _;
use serde_json::Value;

use crate::accumulator::BlockTracker;
use crate::errors::ProviderError;
use crate::provider::{ByteStream, StreamCall};
use crate::types::{StopReason, UsageUpdate};
use crate::vendors::{sse, token_count};

pub(crate) async fn read_stream(body: ByteStream, call: &mut StreamCall) -> Result<(), ProviderError> {
    let events = sse::json_events(call.provider().clone(), body);
    let mut events = std::pin::pin!(events);
    let mut decoder = MessagesDecoder::default();
    while let Some(event) = events.next().await {
        decoder.apply(&event?, call)?;
        if decoder.finished {
            break;
        }
    }
    decoder.finish(call)
}

#[derive(Default)]
struct MessagesDecoder {
    blocks: BlockTracker<u64>,
    stop_reason_seen: bool,
    finished: bool,
}

fn usage_update(usage: &Value) -> UsageUpdate {
    UsageUpdate {
        input: token_count(usage, "input_tokens"),
        output: token_count(usage, "output_tokens"),
        cache_read: token_count(usage, "cache_read_input_tokens"),
        cache_write: token_count(usage, "cache_creation_input_tokens"),
        total_tokens: None,
    }
}

fn map_stop_reason(call: &StreamCall, reason: &str) -> Result<StopReason, ProviderError> {
    match reason {
        "end_turn" | "stop_sequence" | "pause_turn" => Ok(StopReason::Stop),
        "max_tokens" => Ok(StopReason::Length),
        "tool_use" => Ok(StopReason::ToolUse),
        "refusal" | "sensitive" => Err(ProviderError::ContentFiltered {
            provider: call.provider().clone(),
            message: format!("generation stopped: {reason}"),
        }),
        other => Err(ProviderError::protocol(
            call.provider().clone(),
            format!("unhandled stop reason: {other}"),
        )),
    }
}

fn field<'a>(call: &StreamCall, value: &'a Value, key: &str) -> Result<&'a Value, ProviderError> {
    value.get(key).ok_or_else(|| {
        ProviderError::protocol(call.provider().clone(), format!("event is missing `{key}`"))
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

impl MessagesDecoder {
    fn position(&self, call: &StreamCall, event: &Value) -> Result<usize, ProviderError> {
        let index = field(call, event, "index")?.as_u64().unwrap_or(u64::MAX);
        self.blocks.resolve(&index).ok_or_else(|| {
            ProviderError::protocol(call.provider().clone(), format!("delta for unknown block index {index}"))
        })
    }

    fn apply(&mut self, event: &Value, call: &mut StreamCall) -> Result<(), ProviderError> {
        match str_field(event, "type") {
            "message_start" => {
                if let Some(usage) = event.pointer("/message/usage") {
                    call.set_usage(usage_update(usage));
                }
            }
            "content_block_start" => {
                let index = field(call, event, "index")?.as_u64().unwrap_or(u64::MAX);
                let block = field(call, event, "content_block")?;
                match str_field(block, "type") {
                    "text" => {
                        let position = call.start_text();
                        self.blocks.open(index, position);
                    }
                    "thinking" => {
                        let position = call.start_thinking();
                        self.blocks.open(index, position);
                    }
                    "redacted_thinking" => {
                        // Complete on arrival; its stop event finds nothing open.
                        call.push_redacted_thinking(str_field(block, "data"));
                    }
                    "tool_use" => {
                        let position =
                            call.start_tool_call(str_field(block, "id"), str_field(block, "name"));
                        self.blocks.open(index, position);
                    }
                    other => tracing::debug!(block_type = other, "ignoring unknown content block"),
                }
            }
            "content_block_delta" => {
                let position = self.position(call, event)?;
                let delta = field(call, event, "delta")?;
                match str_field(delta, "type") {
                    "text_delta" => call.text_delta(position, str_field(delta, "text"))?,
                    "thinking_delta" => call.thinking_delta(position, str_field(delta, "thinking"))?,
                    "signature_delta" => {
                        call.thinking_signature(position, str_field(delta, "signature"))?;
                    }
                    "input_json_delta" => {
                        call.tool_call_delta(position, str_field(delta, "partial_json"))?;
                    }
                    other => tracing::debug!(delta_type = other, "ignoring unknown delta"),
                }
            }
            "content_block_stop" => {
                let index = field(call, event, "index")?.as_u64().unwrap_or(u64::MAX);
                if let Some(position) = self.blocks.close(&index) {
                    call.end_block(position)?;
                }
            }
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    let reason = map_stop_reason(call, reason)?;
                    call.set_stop_reason(reason);
                    self.stop_reason_seen = true;
                }
                if let Some(usage) = event.get("usage") {
                    call.set_usage(usage_update(usage));
                }
            }
            "message_stop" => self.finished = true,
            "error" => {
                let error = event.get("error").unwrap_or(event);
                return Err(ProviderError::from_stream_error(
                    call.provider().clone(),
                    error.get("type").and_then(Value::as_str),
                    str_field(error, "message"),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self, call: &mut StreamCall) -> Result<(), ProviderError> {
        if self.finished || self.stop_reason_seen {
            Ok(())
        } else {
            Err(ProviderError::network(
                call.provider().clone(),
                "stream ended before the message completed",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AssistantMessageEvent;
    use crate::event_stream::AssistantMessageEventStream;
    use crate::model::Model;
    use crate::types::ContentBlock;
    use crate::vendors::sse::sse_body;
    use serde_json::json;

    fn call() -> StreamCall {
        StreamCall::new(&Model::test_model(), AssistantMessageEventStream::assistant())
    }

    fn names(call: &StreamCall) -> Vec<&'static str> {
        call.events()
            .history()
            .iter()
            .map(AssistantMessageEvent::name)
            .collect()
    }

    #[tokio::test]
    async fn text_turn_ends_with_stop() {
        let mut call = call();
        let body = sse_body(&[
            (Some("message_start"), json!({"type": "message_start", "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}})),
            (Some("content_block_start"), json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            (Some("content_block_delta"), json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})),
            (Some("content_block_stop"), json!({"type": "content_block_stop", "index": 0})),
            (Some("message_delta"), json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}})),
        ]);
        read_stream(body, &mut call).await.expect("stream");
        assert_eq!(names(&call), vec!["text_start", "text_delta", "text_end"]);
        let message = call.message();
        assert_eq!(message.text(), "Hi");
        assert_eq!(message.stop_reason, StopReason::Stop);
        assert_eq!(message.usage.input, 12);
        assert_eq!(message.usage.output, 5);
        assert_eq!(message.usage.total_tokens, 17);
    }

    #[tokio::test]
    async fn thinking_and_tool_use_are_decoded() {
        let mut call = call();
        let body = sse_body(&[
            (None, json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
            (None, json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "check dir"}})),
            (None, json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqS1"}})),
            (None, json!({"type": "content_block_stop", "index": 0})),
            (None, json!({"type": "content_block_start", "index": 1, "content_block": {"type": "redacted_thinking", "data": "enc"}})),
            (None, json!({"type": "content_block_stop", "index": 1})),
            (None, json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}})),
            (None, json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}})),
            (None, json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "\".\"}"}})),
            (None, json!({"type": "content_block_stop", "index": 2})),
            (None, json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 30}})),
            (None, json!({"type": "message_stop"})),
        ]);
        read_stream(body, &mut call).await.expect("stream");
        let message = call.message();
        assert_eq!(message.stop_reason, StopReason::ToolUse);
        match &message.content[0] {
            ContentBlock::Thinking(t) => {
                assert_eq!(t.thinking, "check dir");
                assert_eq!(t.signature.as_deref(), Some("EqS1"));
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert!(matches!(&message.content[1], ContentBlock::Thinking(t) if t.redacted));
        let tool = message.content[2].as_tool_call().expect("tool call");
        assert_eq!(tool.id, "toolu_1");
        assert_eq!(tool.arguments, json!({"path": "."}));
    }

    #[tokio::test]
    async fn error_event_is_classified() {
        let mut call = call();
        let body = sse_body(&[(
            Some("error"),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        )]);
        let err = read_stream(body, &mut call).await.expect_err("error");
        assert!(matches!(err, ProviderError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn refusal_is_a_failure() {
        let mut call = call();
        let body = sse_body(&[(
            None,
            json!({"type": "message_delta", "delta": {"stop_reason": "refusal"}}),
        )]);
        let err = read_stream(body, &mut call).await.expect_err("refusal");
        assert!(matches!(err, ProviderError::ContentFiltered { .. }));
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let mut call = call();
        let body = sse_body(&[
            (None, json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}})),
            (None, json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "par"}})),
        ]);
        let err = read_stream(body, &mut call).await.expect_err("truncated");
        assert!(matches!(err, ProviderError::Network { .. }));
        assert_eq!(call.message().text(), "par");
    }

    #[tokio::test]
    async fn delta_for_unknown_index_is_a_protocol_error() {
        let mut call = call();
        let body = sse_body(&[(
            None,
            json!({"type": "content_block_delta", "index": 4, "delta": {"type": "text_delta", "text": "x"}}),
        )]);
        let err = read_stream(body, &mut call).await.expect_err("unknown index");
        assert!(matches!(err, ProviderError::Protocol { .. }));
    }
}
