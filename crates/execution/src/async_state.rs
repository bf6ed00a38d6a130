//! Durable state of async step tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{InstanceId, StepKey, TaskKey};

/// Lifecycle of an async step task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncTaskState {
    /// Submitted to the async pool.
    Started,
    /// Actively running and reporting progress.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error (including timeout).
    Failed,
    /// Aborted by instance cancellation.
    Cancelled,
}

impl AsyncTaskState {
    /// Returns `true` if the task has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for AsyncTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Durable record of one async step task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncStepState {
    /// Identifier the task is tracked by.
    pub task_id: TaskKey,
    /// The instance the task belongs to.
    pub instance_id: InstanceId,
    /// The step that handed off the task.
    pub step_id: StepKey,
    /// Current lifecycle state.
    pub state: AsyncTaskState,
    /// Data available to callers before the task completes.
    pub immediate_data: Value,
    /// Result snapshot, present once completed.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error message, present once failed.
    #[serde(default)]
    pub error: Option<String>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AsyncStepState {
    /// Create a freshly started task record.
    #[must_use]
    pub fn new(
        task_id: TaskKey,
        instance_id: InstanceId,
        step_id: StepKey,
        immediate_data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            instance_id,
            step_id,
            state: AsyncTaskState::Started,
            immediate_data,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the task as actively running.
    pub fn mark_in_progress(&mut self) {
        self.state = AsyncTaskState::InProgress;
        self.updated_at = Utc::now();
    }

    /// Mark the task as completed with a result snapshot.
    pub fn mark_completed(&mut self, result: Value) {
        self.state = AsyncTaskState::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
    }

    /// Mark the task as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = AsyncTaskState::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Mark the task as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.state = AsyncTaskState::Cancelled;
        self.updated_at = Utc::now();
    }
}
