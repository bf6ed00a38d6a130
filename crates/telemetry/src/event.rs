//! Execution events and the broadcast event bus.

use serde::{Deserialize, Serialize};
use strand_core::{InstanceId, StepKey, TaskKey, WorkflowKey};
use tokio::sync::broadcast;

/// A significant event emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// An instance started executing.
    InstanceStarted {
        /// The instance.
        instance_id: InstanceId,
        /// The workflow being executed.
        workflow_id: WorkflowKey,
    },
    /// A step invocation began.
    StepStarted {
        /// The instance.
        instance_id: InstanceId,
        /// The step being invoked.
        step_id: StepKey,
        /// Which attempt (1-indexed).
        attempt: u32,
    },
    /// A step produced a result.
    StepCompleted {
        /// The instance.
        instance_id: InstanceId,
        /// The step that completed.
        step_id: StepKey,
        /// The result variant produced.
        variant: String,
    },
    /// A step failed.
    StepFailed {
        /// The instance.
        instance_id: InstanceId,
        /// The step that failed.
        step_id: StepKey,
        /// Error message.
        error: String,
    },
    /// A step is about to be retried.
    StepRetrying {
        /// The instance.
        instance_id: InstanceId,
        /// The step being retried.
        step_id: StepKey,
        /// The attempt about to run (1-indexed).
        attempt: u32,
        /// Backoff delay in milliseconds.
        delay_ms: u64,
    },
    /// The instance suspended awaiting external input.
    InstanceSuspended {
        /// The instance.
        instance_id: InstanceId,
        /// The step that suspended.
        step_id: StepKey,
        /// Prompt for the resume caller.
        prompt: String,
    },
    /// The instance resumed.
    InstanceResumed {
        /// The instance.
        instance_id: InstanceId,
        /// The step re-entered.
        step_id: StepKey,
    },
    /// An async task was handed to the pool.
    AsyncTaskScheduled {
        /// The instance.
        instance_id: InstanceId,
        /// The step that handed off.
        step_id: StepKey,
        /// The task.
        task_id: TaskKey,
    },
    /// An async task reported progress.
    AsyncTaskProgress {
        /// The task.
        task_id: TaskKey,
        /// Percent complete in `[0, 100]`.
        percent: u8,
        /// Progress message.
        message: String,
    },
    /// An async task completed.
    AsyncTaskCompleted {
        /// The task.
        task_id: TaskKey,
    },
    /// An async task failed.
    AsyncTaskFailed {
        /// The task.
        task_id: TaskKey,
        /// Error message.
        error: String,
    },
    /// An async task was cancelled.
    AsyncTaskCancelled {
        /// The task.
        task_id: TaskKey,
    },
    /// The instance completed successfully.
    InstanceCompleted {
        /// The instance.
        instance_id: InstanceId,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// The instance failed.
    InstanceFailed {
        /// The instance.
        instance_id: InstanceId,
        /// Error message.
        error: String,
    },
    /// The instance was cancelled.
    InstanceCancelled {
        /// The instance.
        instance_id: InstanceId,
    },
}

impl ExecutionEvent {
    /// The task this event concerns, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskKey> {
        match self {
            Self::AsyncTaskScheduled { task_id, .. }
            | Self::AsyncTaskProgress { task_id, .. }
            | Self::AsyncTaskCompleted { task_id }
            | Self::AsyncTaskFailed { task_id, .. }
            | Self::AsyncTaskCancelled { task_id } => Some(task_id),
            _ => None,
        }
    }

    /// Returns `true` for task-terminal events (completed/failed/cancelled).
    #[must_use]
    pub fn is_task_terminal(&self) -> bool {
        matches!(
            self,
            Self::AsyncTaskCompleted { .. }
                | Self::AsyncTaskFailed { .. }
                | Self::AsyncTaskCancelled { .. }
        )
    }

    /// Returns `true` for task error events.
    #[must_use]
    pub fn is_task_error(&self) -> bool {
        matches!(
            self,
            Self::AsyncTaskFailed { .. } | Self::AsyncTaskCancelled { .. }
        )
    }
}

/// Broadcast bus fanning execution events out to subscribers.
///
/// Backed by `tokio::sync::broadcast`: events published for a given task
/// are observed in publish order; slow subscribers lose the oldest events
/// rather than blocking publishers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Dropped silently when no subscriber is attached.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    /// Attach a subscriber receiving events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

/// A subscription to the event bus.
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl EventSubscriber {
    /// Next buffered event, if any. Skips over lagged gaps.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next event. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
