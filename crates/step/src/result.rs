//! The step-result algebra.
//!
//! Every step invocation produces exactly one [`StepResult`] variant, and
//! the engine's transition function is driven entirely by that variant:
//! continue along an edge, branch by event type, suspend for external
//! input, hand off to the async task manager, finish, or fail.

use std::time::Duration;

use serde_json::Value;
use strand_core::TaskKey;

use crate::error::StepError;
use crate::kind::ValueKind;

/// An event produced by a step that routes via branch targets.
///
/// Routing by "runtime type" is explicit: the event carries its type name
/// and the graph maps type names to target steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEvent {
    /// The event's type name, matched against the graph's branch targets.
    pub event_type: String,
    /// Event payload, handed to the target step as its input.
    pub payload: Value,
}

impl BranchEvent {
    /// Create a new branch event.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A request to durably pause the instance until external input arrives.
#[derive(Debug, Clone)]
pub struct SuspendRequest {
    /// Prompt surfaced to whoever supplies the resume input.
    pub prompt: String,
    /// Arbitrary metadata persisted alongside the suspension.
    pub metadata: Value,
    /// Runtime kind the resume payload must satisfy.
    pub resume_input_kind: ValueKind,
    /// The step's upstream input, preserved for re-entry. When `None`, the
    /// engine records the input it actually passed to the step.
    pub original_input: Option<Value>,
}

impl SuspendRequest {
    /// Create a suspension request.
    pub fn new(prompt: impl Into<String>, resume_input_kind: ValueKind) -> Self {
        Self {
            prompt: prompt.into(),
            metadata: Value::Null,
            resume_input_kind,
            original_input: None,
        }
    }

    /// Attach metadata to the suspension.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Explicitly record the upstream input to preserve across re-entry.
    #[must_use]
    pub fn with_original_input(mut self, input: Value) -> Self {
        self.original_input = Some(input);
        self
    }
}

/// A request to run work off the execution path on the async pool.
#[derive(Debug, Clone)]
pub struct AsyncRequest {
    /// Identifier the progress tracker and async state are keyed by.
    pub task_id: TaskKey,
    /// Data available to callers immediately, before the task completes.
    pub immediate_data: Value,
    /// Arguments handed to the node's async handler.
    pub task_args: Value,
    /// Time budget for the task; `None` disables the timeout.
    pub estimated_duration: Option<Duration>,
}

impl AsyncRequest {
    /// Create an async hand-off request.
    pub fn new(task_id: TaskKey) -> Self {
        Self {
            task_id,
            immediate_data: Value::Null,
            task_args: Value::Null,
            estimated_duration: None,
        }
    }

    /// Attach immediately-available data.
    #[must_use]
    pub fn with_immediate_data(mut self, data: Value) -> Self {
        self.immediate_data = data;
        self
    }

    /// Attach arguments for the async handler.
    #[must_use]
    pub fn with_task_args(mut self, args: Value) -> Self {
        self.task_args = args;
        self
    }

    /// Set the task's time budget.
    #[must_use]
    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }
}

/// The outcome of a step invocation.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// Follow outgoing edges; `data` becomes the next step's input.
    Continue {
        /// Output of this step.
        data: Value,
    },

    /// Route by the event's type via the graph's branch targets.
    Branch {
        /// The routing event.
        event: BranchEvent,
    },

    /// Durably pause awaiting external input.
    Suspend(SuspendRequest),

    /// Hand off to the async task manager; the instance stays alive.
    Async(AsyncRequest),

    /// Terminal success; `result` is stored under the final-result key.
    Finish {
        /// The workflow's terminal result.
        result: Value,
    },

    /// The step failed; the retry policy decides what happens next.
    Fail {
        /// The failure.
        error: StepError,
    },
}

impl StepResult {
    /// Continue with the given output.
    pub fn continue_with(data: Value) -> Self {
        Self::Continue { data }
    }

    /// Branch on an event type with a payload.
    pub fn branch(event_type: impl Into<String>, payload: Value) -> Self {
        Self::Branch {
            event: BranchEvent::new(event_type, payload),
        }
    }

    /// Suspend with the given request.
    pub fn suspend(request: SuspendRequest) -> Self {
        Self::Suspend(request)
    }

    /// Hand off async work.
    pub fn run_async(request: AsyncRequest) -> Self {
        Self::Async(request)
    }

    /// Finish with a terminal result.
    pub fn finish(result: Value) -> Self {
        Self::Finish { result }
    }

    /// Fail with the given error.
    pub fn fail(error: StepError) -> Self {
        Self::Fail { error }
    }

    /// Returns `true` for variants that end the run (`Finish`/`Fail`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Fail { .. })
    }

    /// Returns `true` for the variants that stop the execution path
    /// (`Suspend`/`Async`); every other variant returns synchronously.
    #[must_use]
    pub fn suspends_engine(&self) -> bool {
        matches!(self, Self::Suspend(_) | Self::Async(_))
    }

    /// Variant name, for logging and journal entries.
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Continue { .. } => "continue",
            Self::Branch { .. } => "branch",
            Self::Suspend(_) => "suspend",
            Self::Async(_) => "async",
            Self::Finish { .. } => "finish",
            Self::Fail { .. } => "fail",
        }
    }
}
