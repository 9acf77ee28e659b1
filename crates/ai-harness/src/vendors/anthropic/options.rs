use crate::options::ToolChoice;

/// Per-call Anthropic Messages options.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AnthropicOptions {
    /// Enables extended thinking (only honoured for reasoning models).
    #[serde(default)]
    pub thinking_enabled: bool,
    /// Thinking budget; defaults to 1024 tokens when thinking is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget_tokens: Option<u32>,
    /// Sends the interleaved-thinking beta header.
    #[serde(default)]
    pub interleaved_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl AnthropicOptions {
    /// Enables thinking with the given budget.
    pub fn thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_enabled = true;
        self.thinking_budget_tokens = Some(budget_tokens);
        self
    }

    pub fn interleaved_thinking(mut self, enabled: bool) -> Self {
        self.interleaved_thinking = enabled;
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}
