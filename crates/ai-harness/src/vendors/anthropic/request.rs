//! Canonical context to Messages API payload.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::model::Model;
use crate::options::{CacheRetention, StreamOptions, ToolChoice};
use crate::types::{
    Api, AssistantMessage, ContentBlock, Context, Message, Tool, ToolResultMessage, UserContent,
    UserContentBlock,
};
use crate::vendors::simple::model_max_tokens;
use crate::vendors::{json_f32, object_schema};

use super::options::AnthropicOptions;

pub(crate) const API_VERSION: &str = "2023-06-01";
/// First system block required for OAuth-authenticated requests.
pub(crate) const OAUTH_IDENTITY: &str = "You are Claude Code, Anthropic's official CLI for Claude.";
const DEFAULT_THINKING_BUDGET: u32 = 1_024;

const BETA_FINE_GRAINED_TOOLS: &str = "fine-grained-tool-streaming-2025-05-14";
const BETA_INTERLEAVED_THINKING: &str = "interleaved-thinking-2025-05-14";
const BETA_OAUTH: &str = "oauth-2025-04-20";
const BETA_CLAUDE_CODE: &str = "claude-code-20250219";

pub(crate) fn is_oauth_token(api_key: &str) -> bool {
    api_key.contains("sk-ant-oat")
}

/// Adapter defaults and auth headers for one call.
pub(crate) fn auth_headers(api_key: &str, options: &AnthropicOptions) -> BTreeMap<String, String> {
    let oauth = is_oauth_token(api_key);
    let mut betas = Vec::new();
    if oauth {
        betas.extend([BETA_CLAUDE_CODE, BETA_OAUTH]);
    }
    betas.push(BETA_FINE_GRAINED_TOOLS);
    if options.interleaved_thinking {
        betas.push(BETA_INTERLEAVED_THINKING);
    }

    let mut headers = BTreeMap::from([
        ("accept".to_string(), "application/json".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
        ("anthropic-version".to_string(), API_VERSION.to_string()),
        ("anthropic-beta".to_string(), betas.join(",")),
    ]);
    if oauth {
        headers.insert("authorization".into(), format!("Bearer {api_key}"));
    } else {
        headers.insert("x-api-key".into(), api_key.to_string());
    }
    headers
}

fn cache_control(retention: CacheRetention, base_url: &str) -> Option<Value> {
    match retention {
        CacheRetention::None => None,
        CacheRetention::Short => Some(json!({"type": "ephemeral"})),
        // The one-hour TTL is only offered by the first-party endpoint.
        CacheRetention::Long if base_url.contains("api.anthropic.com") => {
            Some(json!({"type": "ephemeral", "ttl": "1h"}))
        }
        CacheRetention::Long => Some(json!({"type": "ephemeral"})),
    }
}

pub(crate) fn build_body(
    model: &Model,
    base_url: &str,
    context: &Context,
    options: &StreamOptions,
    oauth: bool,
) -> Value {
    let anthropic = options.vendor.anthropic().cloned().unwrap_or_default();
    let cache = cache_control(options.cache_retention, base_url);
    let thinking = anthropic.thinking_enabled && model.reasoning;

    let mut body = json!({
        "model": model.id,
        "messages": convert_messages(model, &context.messages, cache.as_ref()),
        "max_tokens": options.max_tokens.unwrap_or(model_max_tokens(model) / 3).max(1),
        "stream": true,
    });

    let system = system_blocks(context, oauth, cache.as_ref());
    if !system.is_empty() {
        body["system"] = Value::Array(system);
    }
    if let Some(temperature) = options.temperature
        && !thinking
    {
        body["temperature"] = json_f32(temperature);
    }
    if !context.tools.is_empty() {
        body["tools"] = Value::Array(context.tools.iter().map(tool_definition).collect());
    }
    if thinking {
        body["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": anthropic.thinking_budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET),
        });
    }
    if let Some(choice) = &anthropic.tool_choice {
        body["tool_choice"] = tool_choice(choice);
    }
    body
}

fn system_blocks(context: &Context, oauth: bool, cache: Option<&Value>) -> Vec<Value> {
    let mut blocks = Vec::new();
    if oauth {
        blocks.push(json!({"type": "text", "text": OAUTH_IDENTITY}));
    }
    if let Some(prompt) = context.trimmed_system_prompt() {
        blocks.push(json!({"type": "text", "text": prompt}));
    }
    if let (Some(cache), Some(last)) = (cache, blocks.last_mut()) {
        last["cache_control"] = cache.clone();
    }
    blocks
}

fn tool_definition(tool: &Tool) -> Value {
    let schema = object_schema(&tool.parameters);
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": {
            "type": "object",
            "properties": schema["properties"],
            "required": schema.get("required").cloned().unwrap_or_else(|| json!([])),
        },
    })
}

fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

fn convert_messages(model: &Model, messages: &[Message], cache: Option<&Value>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut iter = messages.iter().peekable();
    while let Some(message) = iter.next() {
        match message {
            Message::User(user) => {
                if let Some(content) = user_content(model, &user.content) {
                    out.push(json!({"role": "user", "content": content}));
                }
            }
            Message::Assistant(assistant) => {
                let blocks = assistant_blocks(assistant);
                if !blocks.is_empty() {
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            // Consecutive results answer one assistant turn and travel as a
            // single user message.
            Message::ToolResult(first) => {
                let mut blocks = vec![tool_result_block(model, first)];
                while let Some(Message::ToolResult(next)) = iter.peek() {
                    blocks.push(tool_result_block(model, next));
                    iter.next();
                }
                out.push(json!({"role": "user", "content": blocks}));
            }
        }
    }

    if let Some(cache) = cache {
        mark_last_user_turn(&mut out, cache);
    }
    out
}

fn mark_last_user_turn(messages: &mut [Value], cache: &Value) {
    let Some(last) = messages.iter_mut().rev().find(|m| m["role"] == "user") else {
        return;
    };
    let content = &mut last["content"];
    if let Value::String(text) = content {
        *content = json!([{"type": "text", "text": text, "cache_control": cache}]);
    } else if let Some(block) = content.as_array_mut().and_then(|blocks| blocks.last_mut()) {
        block["cache_control"] = cache.clone();
    }
}

fn image_block(data: &str, mime_type: &str) -> Value {
    json!({
        "type": "image",
        "source": {"type": "base64", "media_type": mime_type, "data": data},
    })
}

fn user_blocks(model: &Model, blocks: &[UserContentBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter_map(|block| match block {
            UserContentBlock::Text(text) if !text.text.trim().is_empty() => {
                Some(json!({"type": "text", "text": text.text}))
            }
            UserContentBlock::Image(image) if model.supports_images() => {
                Some(image_block(&image.data, &image.mime_type))
            }
            _ => None,
        })
        .collect()
}

fn user_content(model: &Model, content: &UserContent) -> Option<Value> {
    match content {
        UserContent::Text(text) if text.trim().is_empty() => None,
        UserContent::Text(text) => Some(Value::String(text.clone())),
        UserContent::Blocks(blocks) => {
            let blocks = user_blocks(model, blocks);
            (!blocks.is_empty()).then_some(Value::Array(blocks))
        }
    }
}

fn assistant_blocks(message: &AssistantMessage) -> Vec<Value> {
    let native = message.api == Api::AnthropicMessages;
    let mut blocks = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(text) if !text.text.trim().is_empty() => {
                blocks.push(json!({"type": "text", "text": text.text}));
            }
            ContentBlock::Text(_) => {}
            ContentBlock::Thinking(thinking) if thinking.redacted => {
                if native && let Some(data) = &thinking.signature {
                    blocks.push(json!({"type": "redacted_thinking", "data": data}));
                }
            }
            ContentBlock::Thinking(thinking) if native && thinking.has_signature() => {
                blocks.push(json!({
                    "type": "thinking",
                    "thinking": thinking.thinking,
                    "signature": thinking.signature,
                }));
            }
            // Unsigned thinking cannot be verified, so it is replayed as text.
            ContentBlock::Thinking(thinking) => {
                if !thinking.thinking.trim().is_empty() {
                    blocks.push(json!({"type": "text", "text": thinking.thinking}));
                }
            }
            ContentBlock::ToolCall(call) => {
                let input = if call.arguments.is_object() {
                    call.arguments.clone()
                } else {
                    json!({})
                };
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input,
                }));
            }
        }
    }
    blocks
}

fn tool_result_block(model: &Model, result: &ToolResultMessage) -> Value {
    let has_images = model.supports_images()
        && result
            .content
            .iter()
            .any(|block| matches!(block, UserContentBlock::Image(_)));
    let content = if has_images {
        Value::Array(user_blocks(model, &result.content))
    } else {
        let text: Vec<&str> = result
            .content
            .iter()
            .filter_map(|block| match block {
                UserContentBlock::Text(text) => Some(text.text.as_str()),
                UserContentBlock::Image(_) => None,
            })
            .collect();
        Value::String(text.join("\n"))
    };
    json!({
        "type": "tool_result",
        "tool_use_id": result.tool_call_id,
        "content": content,
        "is_error": result.is_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageContent, ThinkingContent, ToolCall};

    fn assistant(api: Api, content: Vec<ContentBlock>) -> Message {
        let mut message = AssistantMessage::empty(&Model::test_model());
        message.api = api;
        message.content = content;
        Message::Assistant(message)
    }

    fn body(context: &Context, options: &StreamOptions) -> Value {
        let model = Model::test_model().reasoning(true);
        build_body(&model, &model.base_url, context, options, false)
    }

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let context = Context::new(vec![
            Message::user("list and read"),
            assistant(
                Api::AnthropicMessages,
                vec![
                    ContentBlock::ToolCall(ToolCall::new("t1", "ls")),
                    ContentBlock::ToolCall(ToolCall::new("t2", "read")),
                ],
            ),
            ToolResultMessage::text("t1", "ls", "a.txt", false).into(),
            ToolResultMessage::text("t2", "read", "boom", true).into(),
        ]);
        let body = body(&context, &StreamOptions::default().cache_retention(CacheRetention::None));
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        let results = messages[2]["content"].as_array().expect("results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "t1");
        assert_eq!(results[0]["content"], "a.txt");
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn cache_control_marks_system_and_last_user_turn() {
        let context = Context::new(vec![Message::user("first"), Message::user("second")])
            .system_prompt("be brief");
        let body = body(&context, &StreamOptions::default());
        assert_eq!(body["system"][0]["cache_control"], json!({"type": "ephemeral"}));
        assert_eq!(body["messages"][0]["content"], "first");
        assert_eq!(
            body["messages"][1]["content"],
            json!([{"type": "text", "text": "second", "cache_control": {"type": "ephemeral"}}])
        );

        let body = self::body(
            &context,
            &StreamOptions::default().cache_retention(CacheRetention::Long),
        );
        assert_eq!(body["system"][0]["cache_control"]["ttl"], "1h");
    }

    #[test]
    fn thinking_replay_depends_on_originating_api() {
        let signed = ContentBlock::thinking("plan", Some("sig".into()));
        let redacted = ContentBlock::Thinking(ThinkingContent {
            thinking: String::new(),
            signature: Some("opaque".into()),
            redacted: true,
        });
        let context = Context::new(vec![
            Message::user("q"),
            assistant(Api::AnthropicMessages, vec![signed.clone(), redacted.clone()]),
            Message::user("q2"),
            assistant(Api::OpenAiResponses, vec![signed, redacted]),
        ]);
        let body = body(&context, &StreamOptions::default());
        assert_eq!(
            body["messages"][1]["content"],
            json!([
                {"type": "thinking", "thinking": "plan", "signature": "sig"},
                {"type": "redacted_thinking", "data": "opaque"},
            ])
        );
        assert_eq!(body["messages"][3]["content"], json!([{"type": "text", "text": "plan"}]));
    }

    #[test]
    fn thinking_suppresses_temperature() {
        let context = Context::new(vec![Message::user("hi")]);
        let options = StreamOptions::default()
            .temperature(0.5)
            .vendor(crate::options::VendorOptions::Anthropic(
                AnthropicOptions::default().thinking(4_096),
            ));
        let body = body(&context, &options);
        assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 4096}));
        assert!(body.get("temperature").is_none());

        let body = self::body(&context, &StreamOptions::default().temperature(0.5));
        assert_eq!(body["temperature"], json!(0.5));
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn oauth_tokens_use_bearer_auth_and_identity_preamble() {
        let headers = auth_headers("sk-ant-oat01-abc", &AnthropicOptions::default());
        assert_eq!(headers["authorization"], "Bearer sk-ant-oat01-abc");
        assert!(!headers.contains_key("x-api-key"));
        assert!(headers["anthropic-beta"].contains(BETA_OAUTH));

        let model = Model::test_model();
        let context = Context::new(vec![Message::user("hi")]).system_prompt("custom");
        let body = build_body(&model, &model.base_url, &context, &StreamOptions::default(), true);
        assert_eq!(body["system"][0]["text"], OAUTH_IDENTITY);
        assert_eq!(body["system"][1]["text"], "custom");

        let headers = auth_headers("sk-ant-api03-xyz", &AnthropicOptions::default());
        assert_eq!(headers["x-api-key"], "sk-ant-api03-xyz");
        assert_eq!(headers["anthropic-version"], API_VERSION);
    }

    #[test]
    fn images_are_dropped_for_text_only_models() {
        let blocks = vec![
            UserContentBlock::text("look"),
            UserContentBlock::Image(ImageContent {
                data: "aGk=".into(),
                mime_type: "image/png".into(),
            }),
        ];
        let text_only = Model::test_model();
        assert_eq!(user_blocks(&text_only, &blocks).len(), 1);
        let vision = Model::test_model().with_images();
        let converted = user_blocks(&vision, &blocks);
        assert_eq!(converted[1]["source"]["media_type"], "image/png");
    }
}
