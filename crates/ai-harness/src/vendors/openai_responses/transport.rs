//! Responses API SSE events to canonical stream operations.

use std::collections::{HashMap, HashSet};

use futures::StreamExt as _;
use serde_json::Value;

use crate::accumulator::BlockTracker;
use crate::errors::ProviderError;
use crate::models::ServiceTier;
use crate::provider::{ByteStream, StreamCall};
use crate::types::{StopReason, UsageUpdate};
use crate::vendors::{NULL, sse, token_count};

pub(crate) async fn read_stream(
    body: ByteStream,
    call: &mut StreamCall,
    service_tier: Option<ServiceTier>,
) -> Result<(), ProviderError> {
    let events = sse::json_events(call.provider().clone(), body);
    let mut events = std::pin::pin!(events);
    let mut decoder = ResponsesDecoder {
        service_tier,
        ..ResponsesDecoder::default()
    };
    while let Some(event) = events.next().await {
        decoder.apply(&event?, call)?;
        if decoder.finished {
            return Ok(());
        }
    }
    Err(ProviderError::network(
        call.provider().clone(),
        "stream ended before the response completed",
    ))
}

#[derive(Default)]
struct ResponsesDecoder {
    items: BlockTracker<u64>,
    /// Summary parts seen per reasoning item, to separate them.
    summary_parts: HashMap<u64, usize>,
    /// Function calls announced with arguments and not yet streamed; the
    /// first delta restarts their text.
    seeded: HashSet<u64>,
    service_tier: Option<ServiceTier>,
    finished: bool,
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn usage_update(usage: &Value) -> UsageUpdate {
    let cached = usage
        .pointer("/input_tokens_details/cached_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    UsageUpdate {
        // Cached tokens are billed separately from fresh input.
        input: token_count(usage, "input_tokens").map(|input| input.saturating_sub(cached)),
        output: token_count(usage, "output_tokens"),
        cache_read: Some(cached),
        cache_write: Some(0),
        total_tokens: token_count(usage, "total_tokens"),
    }
}

impl ResponsesDecoder {
    fn output_index(event: &Value) -> u64 {
        event.get("output_index").and_then(Value::as_u64).unwrap_or(0)
    }

    fn position(&self, call: &StreamCall, event: &Value) -> Result<usize, ProviderError> {
        let index = Self::output_index(event);
        self.items.resolve(&index).ok_or_else(|| {
            ProviderError::protocol(call.provider().clone(), format!("event for unknown output item {index}"))
        })
    }

    fn apply(&mut self, event: &Value, call: &mut StreamCall) -> Result<(), ProviderError> {
        match str_field(event, "type") {
            "response.output_item.added" => {
                let item = event.get("item").unwrap_or(&NULL);
                let index = Self::output_index(event);
                let position = match str_field(item, "type") {
                    "reasoning" => call.start_thinking(),
                    "message" => call.start_text(),
                    "function_call" => {
                        let id = format!("{}|{}", str_field(item, "call_id"), str_field(item, "id"));
                        let position = call.start_tool_call(id, str_field(item, "name"));
                        let arguments = str_field(item, "arguments");
                        if !arguments.is_empty() {
                            call.set_tool_call_arguments(position, arguments)?;
                            self.seeded.insert(index);
                        }
                        position
                    }
                    other => {
                        tracing::debug!(item_type = other, "ignoring output item");
                        return Ok(());
                    }
                };
                self.items.open(index, position);
            }
            "response.reasoning_summary_part.added" => {
                let index = Self::output_index(event);
                let seen = self.summary_parts.entry(index).or_default();
                *seen += 1;
                if *seen > 1 {
                    let position = self.position(call, event)?;
                    call.thinking_delta(position, "\n\n")?;
                }
            }
            "response.reasoning_summary_text.delta" => {
                let position = self.position(call, event)?;
                call.thinking_delta(position, str_field(event, "delta"))?;
            }
            "response.output_text.delta" | "response.refusal.delta" => {
                let position = self.position(call, event)?;
                call.text_delta(position, str_field(event, "delta"))?;
            }
            "response.function_call_arguments.delta" => {
                let position = self.position(call, event)?;
                if self.seeded.remove(&Self::output_index(event)) {
                    call.set_tool_call_arguments(position, "")?;
                }
                call.tool_call_delta(position, str_field(event, "delta"))?;
            }
            "response.function_call_arguments.done" => {
                let position = self.position(call, event)?;
                call.set_tool_call_arguments(position, str_field(event, "arguments"))?;
            }
            "response.output_item.done" => {
                let index = Self::output_index(event);
                let Some(position) = self.items.close(&index) else {
                    return Ok(());
                };
                let item = event.get("item").unwrap_or(&NULL);
                match str_field(item, "type") {
                    "reasoning" => {
                        call.thinking_signature(position, &item.to_string())?;
                    }
                    "function_call" => {
                        if let Some(arguments) = item.get("arguments").and_then(Value::as_str) {
                            call.set_tool_call_arguments(position, arguments)?;
                        }
                    }
                    _ => {}
                }
                self.summary_parts.remove(&index);
                call.end_block(position)?;
            }
            "response.completed" | "response.incomplete" | "response.done" => {
                let response = event.get("response").unwrap_or(&NULL);
                if let Some(usage) = response.get("usage") {
                    call.set_usage(usage_update(usage));
                }
                if let Some(tier) = self.service_tier {
                    call.set_cost_multiplier(tier.multiplier());
                }
                let reason = match str_field(response, "status") {
                    "incomplete" => StopReason::Length,
                    "failed" | "cancelled" => {
                        return Err(ProviderError::from_stream_error(
                            call.provider().clone(),
                            None,
                            format!("response {}", str_field(response, "status")),
                        ));
                    }
                    _ if call.has_tool_calls() => StopReason::ToolUse,
                    _ => StopReason::Stop,
                };
                call.set_stop_reason(reason);
                self.finished = true;
            }
            "response.failed" => {
                let error = event.pointer("/response/error").unwrap_or(&NULL);
                return Err(ProviderError::from_stream_error(
                    call.provider().clone(),
                    error.get("code").and_then(Value::as_str),
                    non_empty(str_field(error, "message"), "response failed"),
                ));
            }
            "error" => {
                return Err(ProviderError::from_stream_error(
                    call.provider().clone(),
                    event.get("code").and_then(Value::as_str),
                    non_empty(str_field(event, "message"), "unknown error"),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_stream::AssistantMessageEventStream;
    use crate::model::{Model, ModelCost};
    use crate::types::{Api, ContentBlock};
    use crate::vendors::sse::sse_body;
    use serde_json::json;

    fn call() -> StreamCall {
        let model = Model::new("gpt-5", Api::OpenAiResponses, "openai", "https://api.openai.com/v1")
            .cost(ModelCost::new(1.25, 10.0, 0.125, 0.0));
        StreamCall::new(&model, AssistantMessageEventStream::assistant())
    }

    fn completed(status: &str) -> Value {
        json!({
            "type": "response.completed",
            "response": {
                "status": status,
                "usage": {"input_tokens": 100, "output_tokens": 20, "total_tokens": 120, "input_tokens_details": {"cached_tokens": 40}},
            },
        })
    }

    #[tokio::test]
    async fn reasoning_text_and_function_call_are_decoded() {
        let mut call = call();
        let body = sse_body(&[
            (None, json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "reasoning", "id": "rs_1"}})),
            (None, json!({"type": "response.reasoning_summary_part.added", "output_index": 0})),
            (None, json!({"type": "response.reasoning_summary_text.delta", "output_index": 0, "delta": "first"})),
            (None, json!({"type": "response.reasoning_summary_part.added", "output_index": 0})),
            (None, json!({"type": "response.reasoning_summary_text.delta", "output_index": 0, "delta": "second"})),
            (None, json!({"type": "response.output_item.done", "output_index": 0, "item": {"type": "reasoning", "id": "rs_1", "encrypted_content": "enc"}})),
            (None, json!({"type": "response.output_item.added", "output_index": 1, "item": {"type": "message", "id": "msg_1"}})),
            (None, json!({"type": "response.output_text.delta", "output_index": 1, "delta": "Listing"})),
            (None, json!({"type": "response.output_item.done", "output_index": 1, "item": {"type": "message"}})),
            (None, json!({"type": "response.output_item.added", "output_index": 2, "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "ls", "arguments": ""}})),
            (None, json!({"type": "response.function_call_arguments.delta", "output_index": 2, "delta": "{\"p\":"})),
            (None, json!({"type": "response.function_call_arguments.done", "output_index": 2, "arguments": "{\"p\":\".\"}"})),
            (None, json!({"type": "response.output_item.done", "output_index": 2, "item": {"type": "function_call", "arguments": "{\"p\":\".\"}"}})),
            (None, completed("completed")),
        ]);
        read_stream(body, &mut call, None).await.expect("stream");
        let message = call.message();
        match &message.content[0] {
            ContentBlock::Thinking(t) => {
                assert_eq!(t.thinking, "first\n\nsecond");
                let item: Value = serde_json::from_str(t.signature.as_deref().expect("signature")).expect("json");
                assert_eq!(item["encrypted_content"], "enc");
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(message.text(), "Listing");
        let tool = message.content[2].as_tool_call().expect("tool call");
        assert_eq!(tool.id, "call_1|fc_1");
        assert_eq!(tool.arguments, json!({"p": "."}));
        assert_eq!(message.stop_reason, StopReason::ToolUse);
        assert_eq!(message.usage.input, 60);
        assert_eq!(message.usage.cache_read, 40);
        assert_eq!(message.usage.total_tokens, 120);
    }

    #[tokio::test]
    async fn announced_arguments_are_not_doubled_by_deltas() {
        let mut call = call();
        let body = sse_body(&[
            (None, json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "ls", "arguments": "{\"p\":"}})),
            (None, json!({"type": "response.function_call_arguments.delta", "output_index": 0, "delta": "{\"p\":"})),
            (None, json!({"type": "response.function_call_arguments.delta", "output_index": 0, "delta": "\"src\""})),
        ]);
        read_stream(body, &mut call, None).await.expect_err("truncated");
        let arguments = call.message().content[0]
            .as_tool_call()
            .map(|c| c.arguments.clone());
        assert_eq!(arguments, Some(json!({"p": "src"})));
        let deltas: Vec<String> = call
            .events()
            .history()
            .into_iter()
            .filter_map(|event| match event {
                crate::event::AssistantMessageEvent::ToolCallDelta { delta, .. } => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.concat(), "{\"p\":\"src\"");
    }

    #[tokio::test]
    async fn incomplete_maps_to_length_and_tier_scales_cost() {
        let mut call = call();
        let body = sse_body(&[(None, completed("incomplete"))]);
        read_stream(body, &mut call, Some(ServiceTier::Flex)).await.expect("stream");
        let message = call.message();
        assert_eq!(message.stop_reason, StopReason::Length);
        let full = 60.0 * 1.25e-6 + 20.0 * 10.0e-6 + 40.0 * 0.125e-6;
        assert!((message.usage.cost.total - full * 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failed_response_is_an_error() {
        let mut call = call();
        let body = sse_body(&[(
            None,
            json!({"type": "response.failed", "response": {"status": "failed", "error": {"code": "rate_limit_exceeded", "message": "slow down"}}}),
        )]);
        let err = read_stream(body, &mut call, None).await.expect_err("failed");
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(err.message(), "slow down");
    }

    #[tokio::test]
    async fn missing_completion_is_an_error() {
        let mut call = call();
        let body = sse_body(&[(
            None,
            json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "message"}}),
        )]);
        assert!(read_stream(body, &mut call, None).await.is_err());
    }
}
