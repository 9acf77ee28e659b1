use crate::accumulator::PartialMessage;
use crate::types::{AssistantMessage, BlockKind, DoneReason, ErrorReason, ToolCall};

/// Canonical event emitted while an assistant message streams.
///
/// `partial` is a handle to the call's message, shared by every event of the
/// call; it shows the message as it is when read, which may be ahead of the
/// event carrying it.
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantMessageEvent {
    /// First event of every call.
    Start { partial: PartialMessage },
    TextStart {
        content_index: usize,
        partial: PartialMessage,
    },
    TextDelta {
        content_index: usize,
        delta: String,
        partial: PartialMessage,
    },
    TextEnd {
        content_index: usize,
        content: String,
        partial: PartialMessage,
    },
    ThinkingStart {
        content_index: usize,
        partial: PartialMessage,
    },
    ThinkingDelta {
        content_index: usize,
        delta: String,
        partial: PartialMessage,
    },
    ThinkingEnd {
        content_index: usize,
        content: String,
        partial: PartialMessage,
    },
    ToolCallStart {
        content_index: usize,
        partial: PartialMessage,
    },
    /// Raw argument text fragment; the block's `arguments` already holds the
    /// best-effort parse of everything received so far.
    ToolCallDelta {
        content_index: usize,
        delta: String,
        partial: PartialMessage,
    },
    ToolCallEnd {
        content_index: usize,
        tool_call: ToolCall,
        partial: PartialMessage,
    },
    /// Terminal success.
    Done {
        reason: DoneReason,
        message: AssistantMessage,
    },
    /// Terminal failure; `error` carries whatever content had streamed.
    Error {
        reason: ErrorReason,
        error: AssistantMessage,
    },
}

impl AssistantMessageEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Content position targeted by block events.
    pub fn content_index(&self) -> Option<usize> {
        match self {
            Self::TextStart { content_index, .. }
            | Self::TextDelta { content_index, .. }
            | Self::TextEnd { content_index, .. }
            | Self::ThinkingStart { content_index, .. }
            | Self::ThinkingDelta { content_index, .. }
            | Self::ThinkingEnd { content_index, .. }
            | Self::ToolCallStart { content_index, .. }
            | Self::ToolCallDelta { content_index, .. }
            | Self::ToolCallEnd { content_index, .. } => Some(*content_index),
            _ => None,
        }
    }

    /// Kind of block a block event refers to.
    pub fn block_kind(&self) -> Option<BlockKind> {
        match self {
            Self::TextStart { .. } | Self::TextDelta { .. } | Self::TextEnd { .. } => {
                Some(BlockKind::Text)
            }
            Self::ThinkingStart { .. } | Self::ThinkingDelta { .. } | Self::ThinkingEnd { .. } => {
                Some(BlockKind::Thinking)
            }
            Self::ToolCallStart { .. } | Self::ToolCallDelta { .. } | Self::ToolCallEnd { .. } => {
                Some(BlockKind::ToolCall)
            }
            _ => None,
        }
    }

    /// Wire-style name of the event (`text_delta`, `done`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TextStart { .. } => "text_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextEnd { .. } => "text_end",
            Self::ThinkingStart { .. } => "thinking_start",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnd { .. } => "thinking_end",
            Self::ToolCallStart { .. } => "toolcall_start",
            Self::ToolCallDelta { .. } => "toolcall_delta",
            Self::ToolCallEnd { .. } => "toolcall_end",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Live message handle carried by streaming events.
    pub fn partial(&self) -> Option<&PartialMessage> {
        match self {
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. } => Some(partial),
            Self::Done { .. } | Self::Error { .. } => None,
        }
    }

    /// Copy of the message: the current partial state for streaming events,
    /// the final message for terminal ones.
    pub fn message(&self) -> AssistantMessage {
        match self {
            Self::Done { message, .. } => message.clone(),
            Self::Error { error, .. } => error.clone(),
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. } => partial.snapshot(),
        }
    }
}
