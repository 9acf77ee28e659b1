use serde::{Deserialize, Serialize};

/// Dollar cost of a call, derived from token counts and model pricing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

impl Cost {
    /// Scales every component (and the total) by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.input *= factor;
        self.output *= factor;
        self.cache_read *= factor;
        self.cache_write *= factor;
        self.total = self.input + self.output + self.cache_read + self.cache_write;
    }
}

/// Token accounting for one assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: Cost,
}

/// Token counts reported by one usage-bearing wire event.
///
/// Present fields replace the current value; absent fields are left alone.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UsageUpdate {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    pub(crate) fn apply(&mut self, update: &UsageUpdate) {
        if let Some(v) = update.input {
            self.input = v;
        }
        if let Some(v) = update.output {
            self.output = v;
        }
        if let Some(v) = update.cache_read {
            self.cache_read = v;
        }
        if let Some(v) = update.cache_write {
            self.cache_write = v;
        }
        self.total_tokens = update
            .total_tokens
            .unwrap_or(self.input + self.output + self.cache_read + self.cache_write);
    }
}

/// Why an assistant message ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    #[default]
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

impl StopReason {
    /// `error` and `aborted` end a call through the error event.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Aborted)
    }
}

/// Stop reasons that may accompany a `done` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    Stop,
    Length,
    ToolUse,
}

/// Stop reasons that may accompany an `error` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorReason {
    Error,
    Aborted,
}

impl TryFrom<StopReason> for DoneReason {
    type Error = ErrorReason;

    fn try_from(value: StopReason) -> Result<Self, ErrorReason> {
        match value {
            StopReason::Stop => Ok(Self::Stop),
            StopReason::Length => Ok(Self::Length),
            StopReason::ToolUse => Ok(Self::ToolUse),
            StopReason::Error => Err(ErrorReason::Error),
            StopReason::Aborted => Err(ErrorReason::Aborted),
        }
    }
}

impl From<DoneReason> for StopReason {
    fn from(value: DoneReason) -> Self {
        match value {
            DoneReason::Stop => Self::Stop,
            DoneReason::Length => Self::Length,
            DoneReason::ToolUse => Self::ToolUse,
        }
    }
}

impl From<ErrorReason> for StopReason {
    fn from(value: ErrorReason) -> Self {
        match value {
            ErrorReason::Error => Self::Error,
            ErrorReason::Aborted => Self::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_present_fields_only() {
        let mut usage = Usage {
            input: 100,
            output: 5,
            ..Usage::default()
        };
        usage.apply(&UsageUpdate {
            output: Some(40),
            ..UsageUpdate::default()
        });
        assert_eq!(usage.input, 100);
        assert_eq!(usage.output, 40);
        assert_eq!(usage.total_tokens, 140);

        usage.apply(&UsageUpdate {
            output: Some(42),
            ..UsageUpdate::default()
        });
        assert_eq!(usage.output, 42, "values are replaced, never summed");
    }

    #[test]
    fn stop_reason_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(StopReason::ToolUse).expect("serialize"),
            serde_json::json!("toolUse")
        );
    }
}
