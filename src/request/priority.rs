//! Request priority levels and the dynamic queue priority derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Preset priority attached to a request.
///
/// Ordering is `VeryLow < Low < Normal < High < VeryHigh`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background prefetching.
    VeryLow,
    /// Secondary content.
    Low,
    /// Standard priority.
    #[default]
    Normal,
    /// Important content.
    High,
    /// Content that should load ahead of everything else preset.
    VeryHigh,
}

impl Priority {
    /// Priority used for prefetch requests.
    pub const PREFETCH: Self = Self::VeryLow;

    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "very_low" | "very-low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "very_high" | "very-high" => Ok(Self::VeryHigh),
            _ => Err(format!("invalid priority: {s}")),
        }
    }
}

/// Priority the scheduler orders work by.
///
/// Re-derived at every scheduling pass. `HasVisibleBinding` outranks every
/// preset level; the derived `Ord` compares the variant first, then the preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueuePriority {
    /// No live UI binding references the key; use the merged preset.
    Preset(Priority),
    /// At least one live UI binding is waiting for the key.
    HasVisibleBinding,
}

impl From<Priority> for QueuePriority {
    fn from(priority: Priority) -> Self {
        Self::Preset(priority)
    }
}

impl fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset(priority) => write!(f, "{priority}"),
            Self::HasVisibleBinding => f.write_str("has_visible_binding"),
        }
    }
}
