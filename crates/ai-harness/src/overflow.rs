//! Context-window overflow detection.
//!
//! Vendors report overflow with free-form error text, so detection is a
//! best-effort match against known phrasings; it will miss wording it has not
//! seen. Some OpenAI-compatible servers silently truncate instead of failing,
//! which is caught by comparing reported input usage with the window.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{AssistantMessage, StopReason};

struct OverflowPattern {
    regex: Regex,
    suggestion: &'static str,
}

const SHORTEN: &str = "Shorten the conversation or compact earlier messages before retrying.";

static PATTERNS: Lazy<Vec<OverflowPattern>> = Lazy::new(|| {
    [
        (r"prompt is too long", "Anthropic rejected the prompt: compact the history or drop large tool results."),
        (r"input is too long for requested model", "Bedrock rejected the input: compact the history or pick a model with a larger window."),
        (r"exceeds the context window", "OpenAI rejected the input: compact the history or drop large tool results."),
        (r"input token count.*exceeds the maximum", "Gemini rejected the input: reduce the number of input tokens."),
        (r"maximum prompt length is \d+", "xAI rejected the prompt: compact the history."),
        (r"reduce the length of the messages", "Groq rejected the input: shorten the messages."),
        (r"maximum context length is \d+ tokens", "OpenRouter rejected the input: compact the history or choose a larger-context model."),
        (r"exceeds the limit of \d+", "Input exceeds the model limit: compact the history."),
        (r"exceeds the available context size", "llama.cpp rejected the input: raise the server context size or compact the history."),
        (r"greater than the context length", "LM Studio rejected the input: raise the loaded context length or compact the history."),
        (r"context window exceeds limit", "MiniMax rejected the input: compact the history."),
        (r"exceeded model token limit", "Kimi rejected the input: compact the history."),
        (r"context[_ ]length[_ ]exceeded", "Context length exceeded: compact the history."),
        (r"too many tokens", SHORTEN),
        (r"token limit exceeded", SHORTEN),
        (r"^4(?:00|13)\s*(?:status code)?\s*\(no body\)", "Cerebras/Mistral returned an empty 400/413: the request is likely too large; compact the history."),
    ]
    .into_iter()
    .filter_map(|(pattern, suggestion)| {
        Regex::new(&format!("(?i){pattern}"))
            .ok()
            .map(|regex| OverflowPattern { regex, suggestion })
    })
    .collect()
});

fn matching_pattern(error_message: &str) -> Option<&'static OverflowPattern> {
    PATTERNS.iter().find(|p| p.regex.is_match(error_message))
}

/// Returns `true` when `message` indicates the context window was exceeded.
///
/// Either the call failed with a known overflow phrasing, or it succeeded but
/// reported more input tokens (including cache reads) than `context_window`.
pub fn is_context_overflow(message: &AssistantMessage, context_window: Option<u64>) -> bool {
    if message.stop_reason == StopReason::Error
        && let Some(text) = message.error_message.as_deref()
        && matching_pattern(text).is_some()
    {
        return true;
    }
    if message.stop_reason == StopReason::Stop
        && let Some(window) = context_window
    {
        return message.usage.input + message.usage.cache_read > window;
    }
    false
}

/// Remediation hint for a known overflow error text.
pub fn get_overflow_suggestion(error_message: &str) -> Option<&'static str> {
    matching_pattern(error_message).map(|p| p.suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn failed(text: &str) -> AssistantMessage {
        let mut message = AssistantMessage::empty(&Model::test_model());
        message.stop_reason = StopReason::Error;
        message.error_message = Some(text.into());
        message
    }

    fn succeeded(input: u64, cache_read: u64) -> AssistantMessage {
        let mut message = AssistantMessage::empty(&Model::test_model());
        message.usage.input = input;
        message.usage.cache_read = cache_read;
        message
    }

    #[test]
    fn error_phrasings_are_detected() {
        assert!(is_context_overflow(&failed("input exceeds the context window"), None));
        assert!(is_context_overflow(
            &failed("400 prompt is too long: 213462 tokens > 200000 maximum"),
            None
        ));
        assert!(is_context_overflow(
            &failed("This model's maximum context length is 128000 tokens"),
            None
        ));
        assert!(is_context_overflow(&failed("413 status code (no body)"), None));
        assert!(!is_context_overflow(&failed("401 invalid x-api-key"), None));
    }

    #[test]
    fn silent_overflow_uses_reported_usage() {
        assert!(is_context_overflow(&succeeded(1_200, 0), Some(1_000)));
        assert!(is_context_overflow(&succeeded(600, 600), Some(1_000)));
        assert!(!is_context_overflow(&succeeded(500, 0), Some(1_000)));
        assert!(!is_context_overflow(&succeeded(1_200, 0), None));
    }

    #[test]
    fn suggestions_follow_the_matched_phrase() {
        let hint = get_overflow_suggestion("Error: prompt is too long").expect("hint");
        assert!(hint.contains("Anthropic"));
        assert_eq!(get_overflow_suggestion("all good"), None);
    }
}
