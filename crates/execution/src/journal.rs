//! Per-instance execution journal for audit and debugging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strand_core::{StepKey, TaskKey};

use crate::status::InstanceStatus;

/// A journal entry recording a significant event during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    /// The instance was started.
    InstanceStarted {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
    },

    /// A step invocation began.
    StepStarted {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step being invoked.
        step_id: StepKey,
        /// Which attempt (1-indexed).
        attempt: u32,
    },

    /// A step produced a result.
    StepCompleted {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step that completed.
        step_id: StepKey,
        /// Which result variant it produced.
        variant: String,
    },

    /// A step failed.
    StepFailed {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step that failed.
        step_id: StepKey,
        /// Error message.
        error: String,
    },

    /// A step is being retried.
    StepRetrying {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step being retried.
        step_id: StepKey,
        /// The attempt about to run (1-indexed).
        attempt: u32,
        /// Backoff delay before the attempt, in milliseconds.
        delay_ms: u64,
    },

    /// The instance suspended awaiting external input.
    Suspended {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step that suspended.
        step_id: StepKey,
        /// The prompt recorded for the resume caller.
        prompt: String,
    },

    /// The instance resumed with external input.
    Resumed {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step re-entered.
        step_id: StepKey,
    },

    /// A step handed work to the async pool.
    AsyncScheduled {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The step that handed off.
        step_id: StepKey,
        /// The task tracked by the progress tracker.
        task_id: TaskKey,
    },

    /// An async task finished and execution continued.
    AsyncSettled {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// The task that settled.
        task_id: TaskKey,
        /// The normalized result variant.
        variant: String,
    },

    /// The instance reached a terminal status.
    InstanceFinished {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// Final status.
        status: InstanceStatus,
    },

    /// Cancellation was requested.
    CancellationRequested {
        /// When the event occurred.
        timestamp: DateTime<Utc>,
    },
}

impl JournalEntry {
    /// Get the timestamp of this entry.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::InstanceStarted { timestamp }
            | Self::StepStarted { timestamp, .. }
            | Self::StepCompleted { timestamp, .. }
            | Self::StepFailed { timestamp, .. }
            | Self::StepRetrying { timestamp, .. }
            | Self::Suspended { timestamp, .. }
            | Self::Resumed { timestamp, .. }
            | Self::AsyncScheduled { timestamp, .. }
            | Self::AsyncSettled { timestamp, .. }
            | Self::InstanceFinished { timestamp, .. }
            | Self::CancellationRequested { timestamp } => *timestamp,
        }
    }

    /// Get the step id associated with this entry, if any.
    #[must_use]
    pub fn step_id(&self) -> Option<&StepKey> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. }
            | Self::StepRetrying { step_id, .. }
            | Self::Suspended { step_id, .. }
            | Self::Resumed { step_id, .. }
            | Self::AsyncScheduled { step_id, .. } => Some(step_id),
            Self::InstanceStarted { .. }
            | Self::AsyncSettled { .. }
            | Self::InstanceFinished { .. }
            | Self::CancellationRequested { .. } => None,
        }
    }

    /// Returns `true` if this is a step-level event.
    #[must_use]
    pub fn is_step_event(&self) -> bool {
        self.step_id().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn key(s: &str) -> StepKey {
        StepKey::new(s).unwrap()
    }

    #[test]
    fn instance_started_entry() {
        let ts = now();
        let entry = JournalEntry::InstanceStarted { timestamp: ts };
        assert_eq!(entry.timestamp(), ts);
        assert!(!entry.is_step_event());
    }

    #[test]
    fn step_entries_carry_step_id() {
        let step = key("double");
        let entries = [
            JournalEntry::StepStarted {
                timestamp: now(),
                step_id: step.clone(),
                attempt: 1,
            },
            JournalEntry::StepCompleted {
                timestamp: now(),
                step_id: step.clone(),
                variant: "continue".into(),
            },
            JournalEntry::StepFailed {
                timestamp: now(),
                step_id: step.clone(),
                error: "boom".into(),
            },
            JournalEntry::StepRetrying {
                timestamp: now(),
                step_id: step.clone(),
                attempt: 2,
                delay_ms: 10,
            },
        ];
        for entry in &entries {
            assert_eq!(entry.step_id(), Some(&step));
            assert!(entry.is_step_event());
        }
    }

    #[test]
    fn suspension_entries() {
        let entry = JournalEntry::Suspended {
            timestamp: now(),
            step_id: key("ask"),
            prompt: "name?".into(),
        };
        assert!(entry.is_step_event());

        let entry = JournalEntry::Resumed {
            timestamp: now(),
            step_id: key("ask"),
        };
        assert_eq!(entry.step_id(), Some(&key("ask")));
    }

    #[test]
    fn async_entries() {
        let task = TaskKey::new("t1").unwrap();
        let scheduled = JournalEntry::AsyncScheduled {
            timestamp: now(),
            step_id: key("long_task"),
            task_id: task.clone(),
        };
        assert!(scheduled.is_step_event());

        let settled = JournalEntry::AsyncSettled {
            timestamp: now(),
            task_id: task,
            variant: "finish".into(),
        };
        assert!(!settled.is_step_event());
    }

    #[test]
    fn serde_roundtrip_all_variants() {
        let entries = vec![
            JournalEntry::InstanceStarted { timestamp: now() },
            JournalEntry::StepStarted {
                timestamp: now(),
                step_id: key("a"),
                attempt: 1,
            },
            JournalEntry::StepCompleted {
                timestamp: now(),
                step_id: key("a"),
                variant: "continue".into(),
            },
            JournalEntry::StepFailed {
                timestamp: now(),
                step_id: key("a"),
                error: "err".into(),
            },
            JournalEntry::StepRetrying {
                timestamp: now(),
                step_id: key("a"),
                attempt: 2,
                delay_ms: 20,
            },
            JournalEntry::Suspended {
                timestamp: now(),
                step_id: key("a"),
                prompt: "p".into(),
            },
            JournalEntry::Resumed {
                timestamp: now(),
                step_id: key("a"),
            },
            JournalEntry::AsyncScheduled {
                timestamp: now(),
                step_id: key("a"),
                task_id: TaskKey::new("t1").unwrap(),
            },
            JournalEntry::AsyncSettled {
                timestamp: now(),
                task_id: TaskKey::new("t1").unwrap(),
                variant: "finish".into(),
            },
            JournalEntry::InstanceFinished {
                timestamp: now(),
                status: InstanceStatus::Completed,
            },
            JournalEntry::CancellationRequested { timestamp: now() },
        ];

        for entry in &entries {
            let json = serde_json::to_string(entry).unwrap();
            let back: JournalEntry = serde_json::from_str(&json).unwrap();
            assert_eq!(entry.timestamp(), back.timestamp());
            assert_eq!(entry.step_id(), back.step_id());
        }
    }
}
