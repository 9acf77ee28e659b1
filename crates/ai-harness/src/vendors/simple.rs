//! Helpers for mapping [`SimpleStreamOptions`] onto vendor options.

use crate::model::Model;
use crate::models::supports_xhigh;
use crate::options::{ReasoningEffort, SimpleStreamOptions};
use crate::types::ThinkingLevel;

/// Output-token ceiling used when the caller does not set one.
const DEFAULT_MAX_TOKENS_CAP: u32 = 32_000;
/// Tokens kept for the visible answer when the budget would consume the
/// whole output allowance.
const MIN_OUTPUT_TOKENS: u32 = 1_024;

pub(crate) fn model_max_tokens(model: &Model) -> u32 {
    u32::try_from(model.max_tokens).unwrap_or(u32::MAX)
}

pub(crate) fn base_max_tokens(model: &Model, options: &SimpleStreamOptions) -> u32 {
    options
        .base
        .max_tokens
        .unwrap_or_else(|| model_max_tokens(model).min(DEFAULT_MAX_TOKENS_CAP))
}

/// `(max_tokens, budget)` for budget-based thinking.
///
/// `max_tokens` grows by the budget but never beyond the model limit; if that
/// leaves no room for output, the budget shrinks instead.
pub(crate) fn thinking_plan(model: &Model, options: &SimpleStreamOptions, level: ThinkingLevel) -> Option<(u32, u32)> {
    let budgets = options.thinking_budgets.clone().unwrap_or_default();
    let mut budget = budgets.budget(level.clamp(supports_xhigh(model)))?;
    let max_tokens = base_max_tokens(model, options)
        .saturating_add(budget)
        .min(model_max_tokens(model));
    if max_tokens <= budget {
        budget = max_tokens.saturating_sub(MIN_OUTPUT_TOKENS);
    }
    Some((max_tokens, budget))
}

/// Effort for effort-based vendors, with `xhigh` clamped when unsupported.
pub(crate) fn reasoning_effort(model: &Model, options: &SimpleStreamOptions) -> Option<ReasoningEffort> {
    let level = options.thinking_level()?;
    ReasoningEffort::from_level(level.clamp(supports_xhigh(model)))
}
