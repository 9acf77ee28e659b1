//! Rewrites applied to a conversation before it is replayed against a model.
//!
//! History may contain assistant turns from other vendors whose thinking
//! signatures, tool-call ids and continuation data the target cannot accept.
//! The pipeline runs ordered [`TransformStage`]s and checks the message list
//! before and after each one, failing fast with
//! [`TransformError::StructuralViolation`].

use std::collections::{HashMap, HashSet};

use crate::errors::TransformError;
use crate::model::{Model, ProviderId};
use crate::types::{Api, AssistantMessage, ContentBlock, Message, StopReason, ToolResultMessage};

/// Text of the synthetic result inserted for a tool call that never got one.
pub const MISSING_TOOL_RESULT_TEXT: &str = "No result provided";

/// Rewrites a tool-call id into the target vendor's accepted charset.
pub type ToolCallIdNormalizer<'n> = dyn Fn(&str) -> String + Send + Sync + 'n;

/// Model the history is being prepared for.
#[derive(Clone, Copy)]
pub struct TransformTarget<'a> {
    pub api: &'a Api,
    pub provider: &'a ProviderId,
    pub model_id: &'a str,
    normalizer: Option<&'a ToolCallIdNormalizer<'a>>,
}

impl<'a> TransformTarget<'a> {
    pub fn for_model(model: &'a Model) -> Self {
        Self {
            api: &model.api,
            provider: &model.provider,
            model_id: &model.id,
            normalizer: None,
        }
    }

    pub fn with_tool_call_id_normalizer(mut self, normalizer: &'a ToolCallIdNormalizer<'a>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Whether `message` was produced by the target itself.
    pub fn produced(&self, message: &AssistantMessage) -> bool {
        &message.api == self.api && &message.provider == self.provider && message.model == self.model_id
    }

    fn normalize_id(&self, id: &str) -> String {
        match self.normalizer {
            Some(normalize) => normalize(id),
            None => id.to_string(),
        }
    }
}

/// One pure rewrite over the message list.
pub trait TransformStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, messages: Vec<Message>, target: &TransformTarget<'_>) -> Vec<Message>;

    /// Stages returning `true` guarantee the tool-call/result pairing
    /// invariant; it is checked after them and after every later stage.
    fn establishes_pairing(&self) -> bool {
        false
    }
}

/// Makes assistant turns from other models safe to send to the target.
///
/// Unsigned thinking becomes text (or disappears when empty), redacted
/// thinking is dropped, tool-call continuation data is stripped and tool-call
/// ids are renamed through the target's normalizer. Renames are propagated to
/// the tool results of the same turn.
pub struct NormalizeForTarget;

impl TransformStage for NormalizeForTarget {
    fn name(&self) -> &'static str {
        "normalize_for_target"
    }

    fn apply(&self, messages: Vec<Message>, target: &TransformTarget<'_>) -> Vec<Message> {
        // Renames made by one assistant turn apply only to the results that
        // follow it, up to the next assistant turn.
        let mut renamed: HashMap<String, String> = HashMap::new();
        messages
            .into_iter()
            .map(|message| match message {
                Message::Assistant(assistant) => {
                    renamed.clear();
                    if target.produced(&assistant) {
                        Message::Assistant(assistant)
                    } else {
                        Message::Assistant(normalize_foreign(assistant, target, &mut renamed))
                    }
                }
                Message::ToolResult(mut result) => {
                    if let Some(id) = renamed.get(&result.tool_call_id) {
                        result.tool_call_id = id.clone();
                    }
                    Message::ToolResult(result)
                }
                other => other,
            })
            .collect()
    }
}

fn normalize_foreign(
    mut message: AssistantMessage,
    target: &TransformTarget<'_>,
    renamed: &mut HashMap<String, String>,
) -> AssistantMessage {
    let content = std::mem::take(&mut message.content);
    message.content = content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Thinking(thinking) if thinking.redacted => None,
            ContentBlock::Thinking(thinking) if thinking.has_signature() => {
                Some(ContentBlock::Thinking(thinking))
            }
            ContentBlock::Thinking(thinking) => {
                if thinking.thinking.trim().is_empty() {
                    None
                } else {
                    Some(ContentBlock::text(thinking.thinking))
                }
            }
            ContentBlock::ToolCall(mut call) => {
                call.thought_signature = None;
                let normalized = target.normalize_id(&call.id);
                if normalized != call.id {
                    renamed.insert(std::mem::replace(&mut call.id, normalized.clone()), normalized);
                }
                Some(ContentBlock::ToolCall(call))
            }
            text => Some(text),
        })
        .collect();
    message
}

/// Inserts an error result for every tool call left without one before the
/// next user or assistant turn, and drops repeated results for a call that
/// was already answered. Failed or aborted assistant turns demand no results.
pub struct RepairOrphanedToolCalls;

impl TransformStage for RepairOrphanedToolCalls {
    fn name(&self) -> &'static str {
        "repair_orphaned_tool_calls"
    }

    fn apply(&self, messages: Vec<Message>, _target: &TransformTarget<'_>) -> Vec<Message> {
        let mut out = Vec::with_capacity(messages.len());
        // Calls of the latest assistant turn, in emission order.
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut answered: HashSet<String> = HashSet::new();

        for message in messages {
            match &message {
                Message::ToolResult(result) => {
                    if answered.contains(&result.tool_call_id) {
                        continue;
                    }
                    if let Some(pos) = pending.iter().position(|(id, _)| *id == result.tool_call_id) {
                        pending.remove(pos);
                        answered.insert(result.tool_call_id.clone());
                    }
                }
                Message::User(_) | Message::Assistant(_) => {
                    flush_missing(&mut pending, &mut out);
                    answered.clear();
                    if let Message::Assistant(assistant) = &message
                        && !matches!(assistant.stop_reason, StopReason::Error | StopReason::Aborted)
                    {
                        pending = assistant
                            .tool_calls()
                            .map(|call| (call.id.clone(), call.name.clone()))
                            .collect();
                    }
                }
            }
            out.push(message);
        }
        flush_missing(&mut pending, &mut out);
        out
    }

    fn establishes_pairing(&self) -> bool {
        true
    }
}

fn flush_missing(pending: &mut Vec<(String, String)>, out: &mut Vec<Message>) {
    for (id, name) in pending.drain(..) {
        out.push(ToolResultMessage::text(id, name, MISSING_TOOL_RESULT_TEXT, true).into());
    }
}

/// Ordered list of stages with validation around each one.
pub struct Pipeline {
    stages: Vec<Box<dyn TransformStage>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    /// The mandatory stages: normalization, then orphan repair.
    pub fn standard() -> Self {
        Self::empty()
            .stage(NormalizeForTarget)
            .stage(RepairOrphanedToolCalls)
    }

    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage to run after the existing ones.
    pub fn stage(mut self, stage: impl TransformStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn run(
        &self,
        messages: Vec<Message>,
        target: &TransformTarget<'_>,
    ) -> Result<Vec<Message>, TransformError> {
        validate_structure(&messages, "input")?;
        let mut pairing = false;
        let mut messages = messages;
        for stage in &self.stages {
            messages = stage.apply(messages, target);
            validate_structure(&messages, stage.name())?;
            pairing |= stage.establishes_pairing();
            if pairing {
                validate_pairing(&messages, stage.name())?;
            }
        }
        Ok(messages)
    }
}

/// Runs the standard pipeline for `target`.
pub fn transform_messages(
    messages: &[Message],
    target: &TransformTarget<'_>,
) -> Result<Vec<Message>, TransformError> {
    Pipeline::standard().run(messages.to_vec(), target)
}

fn violation(stage: &str, index: usize, message: impl Into<String>) -> TransformError {
    TransformError::StructuralViolation {
        stage: stage.to_string(),
        index,
        message: message.into(),
    }
}

/// Per-message checks: tool calls carry ids and names, ids are unique within
/// one assistant message, tool results reference an id.
pub fn validate_structure(messages: &[Message], stage: &str) -> Result<(), TransformError> {
    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::Assistant(assistant) => {
                let mut seen = HashSet::new();
                for call in assistant.tool_calls() {
                    if call.id.trim().is_empty() {
                        return Err(violation(stage, index, "tool call has an empty id"));
                    }
                    if call.name.trim().is_empty() {
                        return Err(violation(
                            stage,
                            index,
                            format!("tool call `{}` has an empty name", call.id),
                        ));
                    }
                    if !seen.insert(call.id.as_str()) {
                        return Err(violation(
                            stage,
                            index,
                            format!("duplicate tool call id `{}`", call.id),
                        ));
                    }
                }
            }
            Message::ToolResult(result) if result.tool_call_id.trim().is_empty() => {
                return Err(violation(stage, index, "tool result has an empty tool call id"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Every tool call of a successful assistant turn is answered exactly once
/// before the next user or assistant message.
pub fn validate_pairing(messages: &[Message], stage: &str) -> Result<(), TransformError> {
    let mut open: Option<OpenTurn<'_>> = None;
    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::ToolResult(result) => {
                if let Some(turn) = open.as_mut()
                    && let Some(count) = turn.results.get_mut(result.tool_call_id.as_str())
                {
                    *count += 1;
                }
            }
            Message::User(_) => {
                check_turn(open.take(), stage)?;
            }
            Message::Assistant(assistant) => {
                check_turn(open.take(), stage)?;
                if !matches!(assistant.stop_reason, StopReason::Error | StopReason::Aborted) {
                    open = Some(OpenTurn {
                        index,
                        results: assistant.tool_calls().map(|call| (call.id.as_str(), 0)).collect(),
                    });
                }
            }
        }
    }
    check_turn(open, stage)
}

struct OpenTurn<'a> {
    index: usize,
    results: HashMap<&'a str, usize>,
}

fn check_turn(turn: Option<OpenTurn<'_>>, stage: &str) -> Result<(), TransformError> {
    let Some(turn) = turn else {
        return Ok(());
    };
    match turn.results.iter().find(|(_, count)| **count != 1) {
        Some((id, count)) => Err(violation(
            stage,
            turn.index,
            format!("tool call `{id}` has {count} results, expected exactly one"),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ThinkingContent, ToolCall, UserContentBlock};

    fn assistant_from(model: &Model, content: Vec<ContentBlock>, stop: StopReason) -> Message {
        let mut message = AssistantMessage::empty(model);
        message.content = content;
        message.stop_reason = stop;
        message.into()
    }

    fn other_model() -> Model {
        Model::new(
            "gpt-5",
            Api::OpenAiResponses,
            "openai",
            "https://api.openai.com/v1",
        )
    }

    fn tool_results(messages: &[Message]) -> Vec<&ToolResultMessage> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tool_call_ids_are_renamed_and_propagated() {
        let source = Model::test_model();
        let target_model = other_model();
        let normalize = |id: &str| format!("norm-{id}");
        let target = TransformTarget::for_model(&target_model).with_tool_call_id_normalizer(&normalize);
        let messages = vec![
            Message::user("run it"),
            assistant_from(
                &source,
                vec![ContentBlock::ToolCall(ToolCall::new("orig", "bash"))],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("orig", "bash", "ok", false).into(),
        ];

        let out = transform_messages(&messages, &target).expect("transform");
        let call_id = out[1]
            .as_assistant()
            .and_then(|a| a.tool_calls().next())
            .map(|c| c.id.clone());
        assert_eq!(call_id.as_deref(), Some("norm-orig"));
        assert_eq!(tool_results(&out)[0].tool_call_id, "norm-orig");
    }

    #[test]
    fn own_messages_are_left_untouched() {
        let model = Model::test_model();
        let normalize = |id: &str| format!("norm-{id}");
        let target = TransformTarget::for_model(&model).with_tool_call_id_normalizer(&normalize);
        let mut call = ToolCall::new("keep", "bash");
        call.thought_signature = Some("sig".into());
        let messages = vec![
            assistant_from(
                &model,
                vec![
                    ContentBlock::thinking("hmm", None),
                    ContentBlock::ToolCall(call.clone()),
                ],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("keep", "bash", "ok", false).into(),
        ];
        let out = transform_messages(&messages, &target).expect("transform");
        assert_eq!(out, messages);
    }

    #[test]
    fn foreign_thinking_is_downgraded_or_dropped() {
        let source = Model::test_model();
        let target_model = other_model();
        let target = TransformTarget::for_model(&target_model);
        let mut call = ToolCall::new("c1", "read");
        call.thought_signature = Some("opaque".into());
        let messages = vec![assistant_from(
            &source,
            vec![
                ContentBlock::thinking("plan", None),
                ContentBlock::thinking("   ", None),
                ContentBlock::thinking("signed", Some("sig".into())),
                ContentBlock::Thinking(ThinkingContent {
                    thinking: String::new(),
                    signature: Some("enc".into()),
                    redacted: true,
                }),
                ContentBlock::ToolCall(call),
            ],
            StopReason::ToolUse,
        )];

        let out = transform_messages(&messages, &target).expect("transform");
        let assistant = out[0].as_assistant().expect("assistant");
        assert_eq!(assistant.content.len(), 3);
        assert_eq!(assistant.content[0], ContentBlock::text("plan"));
        assert_eq!(assistant.content[1], ContentBlock::thinking("signed", Some("sig".into())));
        let call = assistant.tool_calls().next().expect("call");
        assert_eq!(call.thought_signature, None);
        // The unanswered call got a synthetic result.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn orphaned_calls_get_synthetic_results_once() {
        let model = Model::test_model();
        let target = TransformTarget::for_model(&model);
        let messages = vec![
            Message::user("go"),
            assistant_from(
                &model,
                vec![
                    ContentBlock::ToolCall(ToolCall::new("a", "ls")),
                    ContentBlock::ToolCall(ToolCall::new("b", "cat")),
                ],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("a", "ls", "files", false).into(),
            Message::user("never mind"),
        ];

        let once = transform_messages(&messages, &target).expect("first pass");
        assert_eq!(once.len(), 5);
        let results = tool_results(&once);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].tool_call_id, "b");
        assert!(results[1].is_error);
        assert_eq!(
            results[1].content,
            vec![UserContentBlock::text(MISSING_TOOL_RESULT_TEXT)]
        );
        assert!(matches!(once[4], Message::User(_)));

        let twice = transform_messages(&once, &target).expect("second pass");
        assert_eq!(twice, once);
    }

    #[test]
    fn trailing_orphans_are_repaired() {
        let model = Model::test_model();
        let target = TransformTarget::for_model(&model);
        let messages = vec![assistant_from(
            &model,
            vec![ContentBlock::ToolCall(ToolCall::new("t", "ls"))],
            StopReason::ToolUse,
        )];
        let out = transform_messages(&messages, &target).expect("transform");
        assert_eq!(tool_results(&out).len(), 1);
    }

    #[test]
    fn failed_turns_demand_no_results() {
        let model = Model::test_model();
        let target = TransformTarget::for_model(&model);
        let messages = vec![
            assistant_from(
                &model,
                vec![ContentBlock::ToolCall(ToolCall::new("x", "ls"))],
                StopReason::Aborted,
            ),
            Message::user("again"),
        ];
        let out = transform_messages(&messages, &target).expect("transform");
        assert_eq!(out, messages);
    }

    #[test]
    fn duplicate_results_are_dropped() {
        let model = Model::test_model();
        let target = TransformTarget::for_model(&model);
        let messages = vec![
            assistant_from(
                &model,
                vec![ContentBlock::ToolCall(ToolCall::new("x", "ls"))],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("x", "ls", "one", false).into(),
            ToolResultMessage::text("x", "ls", "two", false).into(),
        ];
        let out = transform_messages(&messages, &target).expect("transform");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn structural_violations_fail_fast() {
        let model = Model::test_model();
        let target = TransformTarget::for_model(&model);
        let messages = vec![assistant_from(
            &model,
            vec![
                ContentBlock::ToolCall(ToolCall::new("dup", "ls")),
                ContentBlock::ToolCall(ToolCall::new("dup", "ls")),
            ],
            StopReason::ToolUse,
        )];
        let err = transform_messages(&messages, &target).expect_err("duplicate ids");
        assert!(matches!(
            err,
            TransformError::StructuralViolation { ref stage, index: 0, .. } if stage == "input"
        ));
    }

    #[test]
    fn normalizer_collapsing_ids_is_reported_by_the_stage() {
        let source = Model::test_model();
        let target_model = other_model();
        let collapse = |_: &str| "same".to_string();
        let target = TransformTarget::for_model(&target_model).with_tool_call_id_normalizer(&collapse);
        let messages = vec![assistant_from(
            &source,
            vec![
                ContentBlock::ToolCall(ToolCall::new("a", "ls")),
                ContentBlock::ToolCall(ToolCall::new("b", "ls")),
            ],
            StopReason::ToolUse,
        )];
        let err = transform_messages(&messages, &target).expect_err("collision");
        assert!(matches!(
            err,
            TransformError::StructuralViolation { ref stage, .. } if stage == "normalize_for_target"
        ));
    }

    #[test]
    fn renames_do_not_leak_into_later_native_turns() {
        let source = Model::test_model();
        let target_model = other_model();
        let normalize = |id: &str| format!("norm-{id}");
        let target = TransformTarget::for_model(&target_model).with_tool_call_id_normalizer(&normalize);
        let messages = vec![
            Message::user("first"),
            assistant_from(
                &source,
                vec![ContentBlock::ToolCall(ToolCall::new("call_1", "bash"))],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("call_1", "bash", "one", false).into(),
            Message::user("second"),
            assistant_from(
                &target_model,
                vec![ContentBlock::ToolCall(ToolCall::new("call_1", "bash"))],
                StopReason::ToolUse,
            ),
            ToolResultMessage::text("call_1", "bash", "two", false).into(),
        ];

        let out = transform_messages(&messages, &target).expect("transform");
        let results = tool_results(&out);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "norm-call_1");
        assert_eq!(results[1].tool_call_id, "call_1");
        let native_id = out[4]
            .as_assistant()
            .and_then(|a| a.tool_calls().next())
            .map(|c| c.id.clone());
        assert_eq!(native_id.as_deref(), Some("call_1"));
    }
}
