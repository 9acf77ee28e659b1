//! Canonical context to Responses API payload.

use serde_json::{Value, json};

use crate::model::Model;
use crate::options::{CacheRetention, ReasoningSummary, StreamOptions, ToolChoice};
use crate::types::{
    Api, AssistantMessage, ContentBlock, Context, ImageContent, Message, Tool, ToolResultMessage,
    UserContent, UserContentBlock,
};
use crate::vendors::{json_f32, object_schema};

/// Splits a `call_id|item_id` tool-call id.
pub(crate) fn split_tool_call_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once('|') {
        Some((call_id, item_id)) => (call_id, Some(item_id)),
        None => (id, None),
    }
}

pub(crate) fn build_body(model: &Model, context: &Context, options: &StreamOptions) -> Value {
    let responses = options.vendor.openai_responses().cloned().unwrap_or_default();
    let mut body = json!({
        "model": model.id,
        "input": convert_input(model, context),
        "stream": true,
        "store": false,
    });

    if options.cache_retention != CacheRetention::None
        && let Some(session_id) = &options.session_id
    {
        body["prompt_cache_key"] = json!(session_id);
    }
    if options.cache_retention == CacheRetention::Long {
        body["prompt_cache_retention"] = json!("24h");
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json_f32(temperature);
    }
    if let Some(tier) = responses.service_tier {
        body["service_tier"] = json!(tier.as_str());
    }
    if !context.tools.is_empty() {
        body["tools"] = Value::Array(context.tools.iter().map(tool_definition).collect());
    }
    if let Some(choice) = &responses.tool_choice {
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Tool(name) => json!({"type": "function", "name": name}),
        };
    }
    if model.reasoning
        && (responses.reasoning_effort.is_some() || responses.reasoning_summary.is_some())
    {
        body["reasoning"] = json!({
            "effort": responses.reasoning_effort.map_or("medium", |e| e.as_str()),
            "summary": responses.reasoning_summary.unwrap_or(ReasoningSummary::Auto),
        });
        body["include"] = json!(["reasoning.encrypted_content"]);
    }
    body
}

fn tool_definition(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "name": tool.name,
        "description": tool.description,
        "parameters": object_schema(&tool.parameters),
        "strict": false,
    })
}

fn input_image(image: &ImageContent) -> Value {
    json!({
        "type": "input_image",
        "detail": "auto",
        "image_url": format!("data:{};base64,{}", image.mime_type, image.data),
    })
}

fn user_parts(model: &Model, blocks: &[UserContentBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) if !text.text.trim().is_empty() => {
                Some(json!({"type": "input_text", "text": text.text}))
            }
            UserContentBlock::Image(image) if model.supports_images() => Some(input_image(image)),
            _ => None,
        })
        .collect()
}

fn convert_input(model: &Model, context: &Context) -> Vec<Value> {
    let mut input = Vec::new();
    if let Some(prompt) = context.trimmed_system_prompt() {
        let role = if model.reasoning { "developer" } else { "system" };
        input.push(json!({"role": role, "content": prompt}));
    }
    for message in &context.messages {
        match message {
            Message::User(user) => {
                let parts = match &user.content {
                    UserContent::Text(text) => user_parts(model, &[UserContentBlock::text(text.clone())]),
                    UserContent::Blocks(blocks) => user_parts(model, blocks),
                };
                if !parts.is_empty() {
                    input.push(json!({"role": "user", "content": parts}));
                }
            }
            Message::Assistant(assistant) => {
                input.extend(assistant_items(assistant, assistant.is_from(model)));
            }
            Message::ToolResult(result) => input.extend(tool_result_items(model, result)),
        }
    }
    input
}

/// Reasoning items travel back verbatim in the thinking signature.
fn reasoning_item(signature: &str) -> Option<Value> {
    serde_json::from_str::<Value>(signature)
        .ok()
        .filter(|item| item["type"] == "reasoning")
}

fn assistant_items(message: &AssistantMessage, same_model: bool) -> Vec<Value> {
    let native = message.api == Api::OpenAiResponses;
    let mut items = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Thinking(thinking) => {
                let item = thinking
                    .signature
                    .as_deref()
                    .filter(|_| native && !thinking.redacted)
                    .and_then(reasoning_item);
                match item {
                    Some(item) => items.push(item),
                    None if !thinking.redacted && !thinking.thinking.trim().is_empty() => {
                        items.push(json!({"role": "assistant", "content": thinking.thinking}));
                    }
                    None => {}
                }
            }
            ContentBlock::Text(text) if !text.text.trim().is_empty() => {
                items.push(json!({"role": "assistant", "content": text.text}));
            }
            ContentBlock::Text(_) => {}
            ContentBlock::ToolCall(call) => {
                let (call_id, item_id) = split_tool_call_id(&call.id);
                let mut item = json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                });
                // Item ids reference reasoning state that only the producing
                // model holds.
                if same_model && let Some(item_id) = item_id {
                    item["id"] = json!(item_id);
                }
                items.push(item);
            }
        }
    }
    items
}

fn tool_result_items(model: &Model, result: &ToolResultMessage) -> Vec<Value> {
    let (call_id, _) = split_tool_call_id(&result.tool_call_id);
    let text: Vec<&str> = result
        .content
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) => Some(text.text.as_str()),
            UserContentBlock::Image(_) => None,
        })
        .collect();
    let mut items = vec![json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": text.join("\n"),
    })];

    // Function outputs are text-only; images follow as a user message.
    let images: Vec<Value> = result
        .content
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Image(image) if model.supports_images() => Some(input_image(image)),
            _ => None,
        })
        .collect();
    if !images.is_empty() {
        let mut content = vec![json!({"type": "input_text", "text": "Attached image(s) from tool result:"})];
        content.extend(images);
        items.push(json!({"role": "user", "content": content}));
    }
    items
}
