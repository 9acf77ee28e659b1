use serde::{Deserialize, Serialize};

use super::{Api, ContentBlock, StopReason, ToolCall, Usage, UserContentBlock};
use crate::model::{Model, ProviderId};

/// User input: either a bare string or a list of text/image blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<UserContentBlock>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: UserContent,
    pub timestamp: i64,
}

/// A model response. Mutated in place while its call streams, immutable
/// once the call has emitted `done` or `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    /// Protocol the message was produced with.
    pub api: Api,
    pub provider: ProviderId,
    /// Vendor model id.
    pub model: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl AssistantMessage {
    /// Empty message attributed to `model`, as created at call start.
    pub fn empty(model: &Model) -> Self {
        Self {
            content: Vec::new(),
            api: model.api.clone(),
            provider: model.provider.clone(),
            model: model.id.clone(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: super::now_millis(),
        }
    }

    /// Concatenates all text blocks in order and ignores other blocks.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text(text) = block {
                out.push_str(&text.text);
            }
        }
        out
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_call)
    }

    /// Returns `true` when this message was produced by exactly `model`.
    pub fn is_from(&self, model: &Model) -> bool {
        self.api == model.api && self.provider == model.provider && self.model == model.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<UserContentBlock>,
    pub is_error: bool,
    pub timestamp: i64,
}

impl ToolResultMessage {
    pub fn text(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![UserContentBlock::text(text)],
            is_error,
            timestamp: super::now_millis(),
        }
    }
}

/// Conversation history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Plain text user message stamped with the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Text(text.into()),
            timestamp: super::now_millis(),
        })
    }

    pub fn user_blocks(blocks: Vec<UserContentBlock>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Blocks(blocks),
            timestamp: super::now_millis(),
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(message) => Some(message),
            _ => None,
        }
    }
}

impl From<AssistantMessage> for Message {
    fn from(value: AssistantMessage) -> Self {
        Self::Assistant(value)
    }
}

impl From<ToolResultMessage> for Message {
    fn from(value: ToolResultMessage) -> Self {
        Self::ToolResult(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextContent;

    #[test]
    fn text_concatenates_text_blocks_only() {
        let mut message = AssistantMessage::empty(&Model::test_model());
        message.content = vec![
            ContentBlock::text("hello"),
            ContentBlock::thinking("ignored", None),
            ContentBlock::Text(TextContent {
                text: " world".into(),
            }),
        ];
        assert_eq!(message.text(), "hello world");
    }

    #[test]
    fn messages_are_tagged_by_role() {
        let value = serde_json::to_value(Message::user("hi")).expect("serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hi");

        let tool = Message::from(ToolResultMessage::text("c1", "ls", "ok", false));
        let value = serde_json::to_value(&tool).expect("serialize");
        assert_eq!(value["role"], "toolResult");
        assert_eq!(value["toolCallId"], "c1");
        let back: Message = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, tool);
    }
}
