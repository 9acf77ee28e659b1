//! Canonical data model shared by every adapter.
//!
//! Messages produced by one vendor are replayed against another, so these
//! types only carry what every protocol can round-trip; vendor quirks live in
//! `vendors::*`.
mod api;
mod content;
mod context;
mod message;
mod thinking;
mod usage;

pub use api::Api;
pub use content::{
    BlockKind, ContentBlock, ImageContent, TextContent, ThinkingContent, ToolCall,
    UserContentBlock,
};
pub use context::{Context, Tool};
pub use message::{AssistantMessage, Message, ToolResultMessage, UserContent, UserMessage};
pub use thinking::{ThinkingBudgets, ThinkingLevel};
pub use usage::{Cost, DoneReason, ErrorReason, StopReason, Usage, UsageUpdate};

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
