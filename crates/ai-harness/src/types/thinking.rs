use serde::{Deserialize, Serialize};

/// Provider-neutral reasoning level requested through the simple options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    #[serde(rename = "xhigh")]
    XHigh,
}

impl ThinkingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    /// `xhigh` falls back to `high` on models that do not accept it.
    pub fn clamp(self, supports_xhigh: bool) -> Self {
        if self == Self::XHigh && !supports_xhigh {
            Self::High
        } else {
            self
        }
    }
}

/// Token budgets used by vendors that size reasoning in tokens rather than
/// effort levels. `xhigh` reuses `high` unless overridden.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBudgets {
    pub minimal: u32,
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhigh: Option<u32>,
}

impl Default for ThinkingBudgets {
    fn default() -> Self {
        Self {
            minimal: 1_024,
            low: 2_048,
            medium: 8_192,
            high: 16_384,
            xhigh: None,
        }
    }
}

impl ThinkingBudgets {
    /// Budget for `level`; `None` when thinking is off.
    pub fn budget(&self, level: ThinkingLevel) -> Option<u32> {
        match level {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal => Some(self.minimal),
            ThinkingLevel::Low => Some(self.low),
            ThinkingLevel::Medium => Some(self.medium),
            ThinkingLevel::High => Some(self.high),
            ThinkingLevel::XHigh => Some(self.xhigh.unwrap_or(self.high)),
        }
    }
}
