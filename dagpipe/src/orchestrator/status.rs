use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a node within one run.
///
/// `Pending -> Running -> Success`, or `Running -> Failed -> Running` while
/// attempts remain. A node left in `Failed` aborted the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// An attempt is in flight.
    Running,
    /// Completed or restored from a checkpoint.
    Success,
    /// The last attempt failed.
    Failed,
}

impl NodeStatus {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
