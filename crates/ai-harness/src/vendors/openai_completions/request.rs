//! Canonical context to Chat Completions payload.

use serde_json::{Map, Value, json};

use crate::model::{MaxTokensField, Model};
use crate::options::{StreamOptions, ToolChoice};
use crate::types::{
    Api, AssistantMessage, ContentBlock, Context, ImageContent, Message, Tool, ToolResultMessage,
    UserContent, UserContentBlock,
};
use crate::vendors::{json_f32, object_schema};

use super::compat::ResolvedCompat;

pub(crate) fn build_body(model: &Model, context: &Context, options: &StreamOptions) -> Value {
    let compat = ResolvedCompat::for_model(model);
    let completions = options.vendor.openai_completions().cloned().unwrap_or_default();
    let mut body = json!({
        "model": model.id,
        "messages": convert_messages(model, &compat, context),
        "stream": true,
    });

    if compat.supports_usage_in_streaming {
        body["stream_options"] = json!({"include_usage": true});
    }
    if compat.supports_store {
        body["store"] = json!(false);
    }
    if let Some(max_tokens) = options.max_tokens {
        let field = match compat.max_tokens_field {
            MaxTokensField::MaxCompletionTokens => "max_completion_tokens",
            MaxTokensField::MaxTokens => "max_tokens",
        };
        body[field] = json!(max_tokens);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json_f32(temperature);
    }
    if !context.tools.is_empty() {
        body["tools"] = Value::Array(context.tools.iter().map(tool_definition).collect());
    }
    if let Some(choice) = &completions.tool_choice {
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        };
    }
    if model.reasoning
        && compat.supports_reasoning_effort
        && let Some(effort) = completions.reasoning_effort
    {
        body["reasoning_effort"] = json!(effort.as_str());
    }
    body
}

fn tool_definition(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": object_schema(&tool.parameters),
            "strict": false,
        },
    })
}

fn image_part(image: &ImageContent) -> Value {
    json!({
        "type": "image_url",
        "image_url": {"url": format!("data:{};base64,{}", image.mime_type, image.data)},
    })
}

fn convert_messages(model: &Model, compat: &ResolvedCompat, context: &Context) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(prompt) = context.trimmed_system_prompt() {
        let role = if model.reasoning && compat.supports_developer_role {
            "developer"
        } else {
            "system"
        };
        messages.push(json!({"role": role, "content": prompt}));
    }
    for message in &context.messages {
        match message {
            Message::User(user) => {
                if let Some(content) = user_content(model, &user.content) {
                    messages.push(json!({"role": "user", "content": content}));
                }
            }
            Message::Assistant(assistant) => {
                if let Some(converted) = assistant_message(assistant) {
                    messages.push(converted);
                }
            }
            Message::ToolResult(result) => messages.extend(tool_result_messages(model, compat, result)),
        }
    }
    messages
}

fn user_content(model: &Model, content: &UserContent) -> Option<Value> {
    match content {
        UserContent::Text(text) if text.trim().is_empty() => None,
        UserContent::Text(text) => Some(Value::String(text.clone())),
        UserContent::Blocks(blocks) => {
            let parts: Vec<Value> = blocks
                .iter()
                .filter_map(|block| match block {
                    UserContentBlock::Text(text) if !text.text.trim().is_empty() => {
                        Some(json!({"type": "text", "text": text.text}))
                    }
                    UserContentBlock::Image(image) if model.supports_images() => Some(image_part(image)),
                    _ => None,
                })
                .collect();
            (!parts.is_empty()).then_some(Value::Array(parts))
        }
    }
}

/// Thinking from this protocol carries the name of the delta field it came
/// from (`reasoning_content`, `reasoning`) as signature and is sent back in
/// that field; anything else is folded into the text.
fn assistant_message(message: &AssistantMessage) -> Option<Value> {
    let native = message.api == Api::OpenAiCompletions;
    let mut out = Map::new();
    out.insert("role".into(), json!("assistant"));

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(t) => text.push_str(&t.text),
            ContentBlock::Thinking(thinking) if thinking.redacted => {}
            ContentBlock::Thinking(thinking) => match thinking.signature.as_deref() {
                Some(field) if native && !field.trim().is_empty() => {
                    out.insert(field.to_string(), json!(thinking.thinking));
                }
                _ => text.push_str(&thinking.thinking),
            },
            ContentBlock::ToolCall(call) => tool_calls.push(json!({
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments.to_string()},
            })),
        }
    }

    if text.trim().is_empty() && tool_calls.is_empty() {
        return None;
    }
    out.insert(
        "content".into(),
        if text.trim().is_empty() { Value::Null } else { Value::String(text) },
    );
    if !tool_calls.is_empty() {
        out.insert("tool_calls".into(), Value::Array(tool_calls));
    }
    Some(Value::Object(out))
}

fn tool_result_messages(model: &Model, compat: &ResolvedCompat, result: &ToolResultMessage) -> Vec<Value> {
    let text: Vec<&str> = result
        .content
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) => Some(text.text.as_str()),
            UserContentBlock::Image(_) => None,
        })
        .collect();
    let mut message = json!({
        "role": "tool",
        "tool_call_id": result.tool_call_id,
        "content": text.join("\n"),
    });
    if compat.requires_tool_result_name {
        message["name"] = json!(result.tool_name);
    }
    let mut out = vec![message];

    let images: Vec<Value> = result
        .content
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Image(image) if model.supports_images() => Some(image_part(image)),
            _ => None,
        })
        .collect();
    if !images.is_empty() {
        let mut content = vec![json!({"type": "text", "text": "Attached image(s) from tool result:"})];
        content.extend(images);
        out.push(json!({"role": "user", "content": content}));
    }
    out
}
