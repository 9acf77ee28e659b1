//! Common imports for typical harness usage.
//!
//! Exports the builder, option and message types most call sites need so
//! examples and application code need fewer import lines.
pub use crate::{
    AbortHandle, AssistantMessageEvent, AssistantMessageEventStream, Harness, HarnessBuilder,
    HarnessError, Model, ProviderId, SimpleStreamOptions, StreamOptions,
};
pub use crate::types::{
    AssistantMessage, ContentBlock, Context, Message, StopReason, ThinkingLevel, Tool,
    ToolResultMessage,
};
