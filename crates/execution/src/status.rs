//! Instance-level status tracking.

use serde::{Deserialize, Serialize};

/// The overall status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Actively executing steps (or waiting on an async task).
    Running,
    /// Durably paused awaiting external input.
    Suspended,
    /// Reached a terminal result.
    Completed,
    /// A step failed and the instance could not continue.
    Failed,
    /// Cancelled by an external request.
    Cancelled,
}

impl InstanceStatus {
    /// Returns `true` if the instance has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if the instance can still make progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }

    /// Returns `true` if the instance finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
