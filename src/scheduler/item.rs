//! Queue item types and unit states.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Completion, SchedulerKey};
use crate::request::QueuePriority;

/// Re-evaluated on every scheduling pass; never cached.
pub type PriorityEvaluator = Box<dyn Fn() -> QueuePriority + Send + Sync>;

/// Performs the admitted work and signals through the [`Completion`] it is given.
pub type StartUnit<K> = Box<dyn FnOnce(Completion<K>) + Send>;

/// Lifecycle position of an admitted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Waiting for a free slot.
    Scheduled,
    /// Started and not yet completed or canceled.
    Running,
}

impl UnitState {
    /// Returns the lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work waiting for a slot.
pub(super) struct QueueItem<K: SchedulerKey> {
    pub(super) key: K,
    pub(super) evaluator: PriorityEvaluator,
    pub(super) start: StartUnit<K>,
    /// Logical enqueue timestamp; larger is more recent.
    pub(super) enqueued: u64,
}

impl<K: SchedulerKey> fmt::Debug for QueueItem<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("key", &self.key)
            .field("enqueued", &self.enqueued)
            .finish_non_exhaustive()
    }
}
