//! Progress tracking for async step tasks.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use strand_core::TaskKey;
use strand_execution::AsyncTaskState;
use strand_step::ProgressHandle;
use strand_telemetry::{EventBus, ExecutionEvent};
use tracing::debug;

/// Compact progress snapshot for a task.
#[derive(Debug, Clone)]
pub struct Progress {
    /// The task.
    pub task_id: TaskKey,
    /// Percent complete in `[0, 100]`, non-decreasing until terminal.
    pub percent: u8,
    /// Last progress message.
    pub message: String,
    /// Lifecycle state.
    pub status: AsyncTaskState,
}

/// Full execution record for a task.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    /// The task.
    pub task_id: TaskKey,
    /// Lifecycle state.
    pub status: AsyncTaskState,
    /// Percent complete in `[0, 100]`.
    pub percent: u8,
    /// Last progress message.
    pub message: String,
    /// The most recent event published for this task.
    pub last_event: Option<ExecutionEvent>,
    /// Result, present once completed.
    pub result: Option<Value>,
    /// Error message, present once failed.
    pub error: Option<String>,
}

impl TaskExecution {
    fn new(task_id: TaskKey) -> Self {
        Self {
            task_id,
            status: AsyncTaskState::Started,
            percent: 0,
            message: String::new(),
            last_event: None,
            result: None,
            error: None,
        }
    }
}

/// Thread-safe registry of per-task progress with event fan-out.
///
/// Multiple producers may report for the same task; updates to one task
/// are serialized under its map entry, so events and snapshots observe
/// publish order. `percent` is clamped to `[0, 100]` and never decreases
/// until a terminal event; reports after a terminal event are dropped.
/// Only the latest state is retained.
#[derive(Debug)]
pub struct ProgressTracker {
    entries: DashMap<TaskKey, TaskExecution>,
    events: Arc<EventBus>,
}

impl ProgressTracker {
    /// Create a tracker publishing to the given bus.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            entries: DashMap::new(),
            events,
        }
    }

    /// Start tracking a task, publishing the initial event.
    pub fn track(&self, task_id: TaskKey, initial_event: ExecutionEvent) {
        let mut record = TaskExecution::new(task_id.clone());
        record.last_event = Some(initial_event.clone());
        self.entries.insert(task_id, record);
        self.events.emit(initial_event);
    }

    /// Create a reporter handle bound to the task.
    #[must_use]
    pub fn reporter(self: &Arc<Self>, task_id: TaskKey) -> TaskProgressReporter {
        TaskProgressReporter {
            tracker: self.clone(),
            task_id,
        }
    }

    /// Compact progress snapshot for a task.
    #[must_use]
    pub fn progress(&self, task_id: &TaskKey) -> Option<Progress> {
        self.entries.get(task_id).map(|e| Progress {
            task_id: e.task_id.clone(),
            percent: e.percent,
            message: e.message.clone(),
            status: e.status,
        })
    }

    /// Full execution record for a task.
    #[must_use]
    pub fn execution(&self, task_id: &TaskKey) -> Option<TaskExecution> {
        self.entries.get(task_id).map(|e| e.value().clone())
    }

    /// Record an externally produced event as the task's latest.
    pub fn update_status(&self, task_id: &TaskKey, event: ExecutionEvent) {
        if let Some(mut entry) = self.entries.get_mut(task_id) {
            entry.last_event = Some(event.clone());
        }
        self.events.emit(event);
    }

    /// Report progress for a task.
    pub fn report(&self, task_id: &TaskKey, percent: u8, message: &str) {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            debug!(%task_id, "progress report for untracked task dropped");
            return;
        };
        if entry.status.is_terminal() {
            debug!(%task_id, "progress report after terminal event dropped");
            return;
        }
        // Clamp to [0, 100] and keep the sequence non-decreasing.
        let applied = percent.min(100).max(entry.percent);
        entry.percent = applied;
        entry.message = message.to_string();
        entry.status = AsyncTaskState::InProgress;

        let event = ExecutionEvent::AsyncTaskProgress {
            task_id: task_id.clone(),
            percent: applied,
            message: message.to_string(),
        };
        entry.last_event = Some(event.clone());
        drop(entry);
        self.events.emit(event);
    }

    /// Record successful completion.
    pub fn on_complete(&self, task_id: &TaskKey, result: Value) {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        entry.status = AsyncTaskState::Completed;
        entry.percent = 100;
        entry.result = Some(result);

        let event = ExecutionEvent::AsyncTaskCompleted {
            task_id: task_id.clone(),
        };
        entry.last_event = Some(event.clone());
        drop(entry);
        self.events.emit(event);
    }

    /// Record failure.
    pub fn on_error(&self, task_id: &TaskKey, error: &str) {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        entry.status = AsyncTaskState::Failed;
        entry.error = Some(error.to_string());

        let event = ExecutionEvent::AsyncTaskFailed {
            task_id: task_id.clone(),
            error: error.to_string(),
        };
        entry.last_event = Some(event.clone());
        drop(entry);
        self.events.emit(event);
    }

    /// Record cancellation.
    pub fn on_cancelled(&self, task_id: &TaskKey) {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        entry.status = AsyncTaskState::Cancelled;

        let event = ExecutionEvent::AsyncTaskCancelled {
            task_id: task_id.clone(),
        };
        entry.last_event = Some(event.clone());
        drop(entry);
        self.events.emit(event);
    }
}

/// Reporter handle bound to one task.
///
/// Handed to async step handlers (as [`ProgressHandle`]) and to anything
/// else that produces progress for the task.
#[derive(Debug, Clone)]
pub struct TaskProgressReporter {
    tracker: Arc<ProgressTracker>,
    task_id: TaskKey,
}

impl TaskProgressReporter {
    /// Report progress.
    pub fn report(&self, percent: u8, message: &str) {
        self.tracker.report(&self.task_id, percent, message);
    }

    /// Record successful completion.
    pub fn complete(&self, result: Value) {
        self.tracker.on_complete(&self.task_id, result);
    }

    /// Record failure.
    pub fn fail(&self, error: &str) {
        self.tracker.on_error(&self.task_id, error);
    }
}

impl ProgressHandle for TaskProgressReporter {
    fn report(&self, percent: u8, message: &str) {
        TaskProgressReporter::report(self, percent, message);
    }
}
