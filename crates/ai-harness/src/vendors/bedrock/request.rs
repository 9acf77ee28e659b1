//! Canonical context to Converse payload.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::model::Model;
use crate::options::{CacheRetention, StreamOptions, ToolChoice};
use crate::types::{
    Api, AssistantMessage, ContentBlock, Context, ImageContent, Message, Tool, ToolResultMessage,
    UserContent, UserContentBlock,
};
use crate::vendors::{json_f32, object_schema};

pub(crate) fn auth_headers(api_key: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("accept".to_string(), "application/vnd.amazon.eventstream".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
        ("authorization".to_string(), format!("Bearer {api_key}")),
    ])
}

/// Claude on Bedrock accepts cache points and the Anthropic thinking block.
fn is_claude(model: &Model) -> bool {
    model.id.contains("anthropic.claude") || model.id.contains("claude")
}

pub(crate) fn build_body(model: &Model, context: &Context, options: &StreamOptions) -> Value {
    let bedrock = options.vendor.bedrock().cloned().unwrap_or_default();
    let cache_point = (is_claude(model) && options.cache_retention != CacheRetention::None)
        .then(|| json!({"cachePoint": {"type": "default"}}));
    let thinking = bedrock
        .thinking_budget_tokens
        .filter(|_| model.reasoning && is_claude(model));

    let mut body = json!({
        "messages": convert_messages(model, &context.messages, cache_point.as_ref()),
    });

    if let Some(prompt) = context.trimmed_system_prompt() {
        let mut system = vec![json!({"text": prompt})];
        system.extend(cache_point.clone());
        body["system"] = Value::Array(system);
    }

    let mut inference = Map::new();
    if let Some(max_tokens) = options.max_tokens {
        inference.insert("maxTokens".into(), json!(max_tokens));
    }
    if let Some(temperature) = options.temperature
        && thinking.is_none()
    {
        inference.insert("temperature".into(), json_f32(temperature));
    }
    if !inference.is_empty() {
        body["inferenceConfig"] = Value::Object(inference);
    }

    // Converse has no "none" choice; leaving tools out has the same effect.
    if !context.tools.is_empty() && bedrock.tool_choice != Some(ToolChoice::None) {
        let mut tool_config = json!({
            "tools": context.tools.iter().map(tool_spec).collect::<Vec<_>>(),
        });
        match &bedrock.tool_choice {
            Some(ToolChoice::Auto) => tool_config["toolChoice"] = json!({"auto": {}}),
            Some(ToolChoice::Required) => tool_config["toolChoice"] = json!({"any": {}}),
            Some(ToolChoice::Tool(name)) => tool_config["toolChoice"] = json!({"tool": {"name": name}}),
            Some(ToolChoice::None) | None => {}
        }
        body["toolConfig"] = tool_config;
    }

    if let Some(budget) = thinking {
        body["additionalModelRequestFields"] = json!({
            "thinking": {"type": "enabled", "budget_tokens": budget},
        });
    }
    body
}

fn tool_spec(tool: &Tool) -> Value {
    json!({
        "toolSpec": {
            "name": tool.name,
            "description": tool.description,
            "inputSchema": {"json": object_schema(&tool.parameters)},
        },
    })
}

fn image_block(image: &ImageContent) -> Value {
    let format = image.mime_type.strip_prefix("image/").unwrap_or(&image.mime_type);
    let format = if format == "jpg" { "jpeg" } else { format };
    json!({"image": {"format": format, "source": {"bytes": image.data}}})
}

fn user_blocks(model: &Model, blocks: &[UserContentBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) if !text.text.trim().is_empty() => Some(json!({"text": text.text})),
            UserContentBlock::Image(image) if model.supports_images() => Some(image_block(image)),
            _ => None,
        })
        .collect()
}

fn convert_messages(model: &Model, messages: &[Message], cache_point: Option<&Value>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut iter = messages.iter().peekable();
    while let Some(message) = iter.next() {
        match message {
            Message::User(user) => {
                let content = match &user.content {
                    UserContent::Text(text) if text.trim().is_empty() => Vec::new(),
                    UserContent::Text(text) => vec![json!({"text": text})],
                    UserContent::Blocks(blocks) => user_blocks(model, blocks),
                };
                if !content.is_empty() {
                    out.push(json!({"role": "user", "content": content}));
                }
            }
            Message::Assistant(assistant) => {
                let content = assistant_blocks(assistant);
                if !content.is_empty() {
                    out.push(json!({"role": "assistant", "content": content}));
                }
            }
            Message::ToolResult(first) => {
                let mut content = vec![tool_result_block(model, first)];
                while let Some(Message::ToolResult(next)) = iter.peek() {
                    content.push(tool_result_block(model, next));
                    iter.next();
                }
                out.push(json!({"role": "user", "content": content}));
            }
        }
    }

    if let Some(cache_point) = cache_point
        && let Some(last) = out.iter_mut().rev().find(|m| m["role"] == "user")
        && let Some(content) = last["content"].as_array_mut()
    {
        content.push(cache_point.clone());
    }
    out
}

fn assistant_blocks(message: &AssistantMessage) -> Vec<Value> {
    let native = message.api == Api::BedrockConverseStream;
    let mut blocks = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(text) if !text.text.trim().is_empty() => {
                blocks.push(json!({"text": text.text}));
            }
            ContentBlock::Text(_) => {}
            ContentBlock::Thinking(thinking) if thinking.redacted => {
                if native && let Some(data) = &thinking.signature {
                    blocks.push(json!({"reasoningContent": {"redactedContent": data}}));
                }
            }
            ContentBlock::Thinking(thinking) if native && thinking.has_signature() => {
                blocks.push(json!({
                    "reasoningContent": {
                        "reasoningText": {"text": thinking.thinking, "signature": thinking.signature},
                    },
                }));
            }
            ContentBlock::Thinking(thinking) => {
                if !thinking.thinking.trim().is_empty() {
                    blocks.push(json!({"text": thinking.thinking}));
                }
            }
            ContentBlock::ToolCall(call) => {
                let input = if call.arguments.is_object() {
                    call.arguments.clone()
                } else {
                    json!({})
                };
                blocks.push(json!({
                    "toolUse": {"toolUseId": call.id, "name": call.name, "input": input},
                }));
            }
        }
    }
    blocks
}

fn tool_result_block(model: &Model, result: &ToolResultMessage) -> Value {
    let mut content: Vec<Value> = result
        .content
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) => Some(json!({"text": text.text})),
            UserContentBlock::Image(image) if model.supports_images() => Some(image_block(image)),
            UserContentBlock::Image(_) => None,
        })
        .collect();
    if content.is_empty() {
        content.push(json!({"text": ""}));
    }
    json!({
        "toolResult": {
            "toolUseId": result.tool_call_id,
            "content": content,
            "status": if result.is_error { "error" } else { "success" },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::VendorOptions;
    use crate::types::{ThinkingContent, ToolCall};
    use crate::vendors::bedrock::BedrockOptions;

    fn claude() -> Model {
        Model::new(
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            Api::BedrockConverseStream,
            "amazon-bedrock",
            "https://bedrock-runtime.us-east-1.amazonaws.com",
        )
        .reasoning(true)
        .with_images()
    }

    fn nova() -> Model {
        Model::new(
            "amazon.nova-pro-v1:0",
            Api::BedrockConverseStream,
            "amazon-bedrock",
            "https://bedrock-runtime.us-east-1.amazonaws.com",
        )
    }

    #[test]
    fn claude_gets_cache_points_and_thinking() {
        let context = Context::new(vec![Message::user("hi")]).system_prompt("sys");
        let options = StreamOptions::default()
            .max_tokens(2_000)
            .temperature(0.2)
            .vendor(VendorOptions::Bedrock(BedrockOptions::default().thinking(1_024)));
        let body = build_body(&claude(), &context, &options);
        assert_eq!(body["system"], json!([{"text": "sys"}, {"cachePoint": {"type": "default"}}]));
        assert_eq!(
            body["messages"][0]["content"],
            json!([{"text": "hi"}, {"cachePoint": {"type": "default"}}])
        );
        assert_eq!(body["inferenceConfig"], json!({"maxTokens": 2000}));
        assert_eq!(
            body["additionalModelRequestFields"]["thinking"],
            json!({"type": "enabled", "budget_tokens": 1024})
        );
    }

    #[test]
    fn other_models_get_plain_payloads() {
        let context = Context::new(vec![Message::user("hi")]).system_prompt("sys");
        let options = StreamOptions::default()
            .temperature(0.5)
            .vendor(VendorOptions::Bedrock(BedrockOptions::default().thinking(1_024)));
        let body = build_body(&nova(), &context, &options);
        assert_eq!(body["system"], json!([{"text": "sys"}]));
        assert_eq!(body["messages"][0]["content"], json!([{"text": "hi"}]));
        assert_eq!(body["inferenceConfig"]["temperature"], json!(0.5));
        assert!(body.get("additionalModelRequestFields").is_none());
    }

    #[test]
    fn tools_and_choice_map_to_tool_config() {
        let tool = Tool::new("ls", "List files", json!({"type": "object", "properties": {"p": {"type": "string"}}}));
        let context = Context::new(vec![Message::user("go")]).tools(vec![tool]);
        let required = StreamOptions::default()
            .vendor(VendorOptions::Bedrock(BedrockOptions::default().tool_choice(ToolChoice::Required)));
        let body = build_body(&nova(), &context, &required);
        assert_eq!(body["toolConfig"]["tools"][0]["toolSpec"]["name"], "ls");
        assert_eq!(body["toolConfig"]["tools"][0]["toolSpec"]["inputSchema"]["json"]["type"], "object");
        assert_eq!(body["toolConfig"]["toolChoice"], json!({"any": {}}));

        let none = StreamOptions::default()
            .vendor(VendorOptions::Bedrock(BedrockOptions::default().tool_choice(ToolChoice::None)));
        assert!(build_body(&nova(), &context, &none).get("toolConfig").is_none());
    }

    #[test]
    fn history_round_trips_tool_use_and_reasoning() {
        let model = claude();
        let mut assistant = AssistantMessage::empty(&model);
        assistant.content = vec![
            ContentBlock::thinking("plan", Some("sig".into())),
            ContentBlock::Thinking(ThinkingContent {
                thinking: String::new(),
                signature: Some("b3BhcXVl".into()),
                redacted: true,
            }),
            ContentBlock::ToolCall(ToolCall::new("tooluse_1", "ls").with_arguments(json!({"p": "."}))),
        ];
        let context = Context::new(vec![
            Message::user("list"),
            Message::Assistant(assistant),
            ToolResultMessage::text("tooluse_1", "ls", "a.txt", false).into(),
        ]);
        let body = build_body(&model, &context, &StreamOptions::default().cache_retention(CacheRetention::None));
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(
            messages[1]["content"],
            json!([
                {"reasoningContent": {"reasoningText": {"text": "plan", "signature": "sig"}}},
                {"reasoningContent": {"redactedContent": "b3BhcXVl"}},
                {"toolUse": {"toolUseId": "tooluse_1", "name": "ls", "input": {"p": "."}}},
            ])
        );
        assert_eq!(
            messages[2]["content"],
            json!([{"toolResult": {"toolUseId": "tooluse_1", "content": [{"text": "a.txt"}], "status": "success"}}])
        );
    }

    #[test]
    fn foreign_thinking_is_sent_as_text() {
        let mut assistant = AssistantMessage::empty(&Model::test_model());
        assistant.content = vec![ContentBlock::thinking("plan", Some("sig".into())), ContentBlock::text("done")];
        assert_eq!(assistant_blocks(&assistant), vec![json!({"text": "plan"}), json!({"text": "done"})]);
    }

    #[test]
    fn image_formats_follow_the_mime_type() {
        let image = ImageContent {
            data: "aGk=".into(),
            mime_type: "image/jpg".into(),
        };
        assert_eq!(image_block(&image)["image"]["format"], "jpeg");
    }
}
