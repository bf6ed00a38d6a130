//! Async task manager.
//!
//! Runs async step work on a bounded pool, tracks per-task state and
//! progress, applies time budgets, and hands the normalized result back to
//! the engine's continuation when the task settles.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use strand_core::{InstanceId, StepKey, TaskKey};
use strand_execution::AsyncStepState;
use strand_step::{AsyncOutput, AsyncRequest, AsyncStepHandler, StepContext, StepError, StepResult};
use strand_storage::AsyncStateRepository;
use strand_telemetry::ExecutionEvent;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::EngineError;
use crate::progress::ProgressTracker;

/// Continuation invoked with the task's normalized result.
pub(crate) type Continuation = Box<dyn FnOnce(StepResult) -> BoxFuture<'static, ()> + Send>;

/// A pre-built future registered under a task id.
pub type RegisteredFuture = BoxFuture<'static, Result<AsyncOutput, StepError>>;

/// Everything the manager needs to run one async step task.
pub(crate) struct SubmitRequest {
    pub instance_id: InstanceId,
    pub step_id: StepKey,
    pub request: AsyncRequest,
    /// Drives plain-value normalization: `Continue` when the node has
    /// outgoing edges, `Finish` otherwise.
    pub node_has_edges: bool,
    pub handler: Option<Arc<dyn AsyncStepHandler>>,
    pub ctx: StepContext,
    pub cancel: CancellationToken,
}

/// Bounded async pool with per-task state and progress tracking.
pub struct AsyncTaskManager {
    concurrency: Arc<Semaphore>,
    /// One permit per admitted submission (running + queued).
    queue: Arc<Semaphore>,
    registered: Mutex<HashMap<TaskKey, RegisteredFuture>>,
    running: DashMap<InstanceId, Vec<(TaskKey, JoinHandle<()>)>>,
    async_states: Arc<dyn AsyncStateRepository>,
    tracker: Arc<ProgressTracker>,
}

impl AsyncTaskManager {
    /// Create a manager with the given pool bounds.
    pub(crate) fn new(
        max_concurrent: usize,
        queue_capacity: usize,
        async_states: Arc<dyn AsyncStateRepository>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queue: Arc::new(Semaphore::new(max_concurrent.max(1) + queue_capacity)),
            registered: Mutex::new(HashMap::new()),
            running: DashMap::new(),
            async_states,
            tracker,
        }
    }

    /// Register a pre-built future to be picked up when a step hands off
    /// a task under the same id.
    pub fn register_future(&self, task_id: TaskKey, future: RegisteredFuture) {
        self.registered.lock().insert(task_id, future);
    }

    /// Submit an async step task.
    ///
    /// Persists the started state, publishes the initial progress event,
    /// and spawns a worker bounded by the pool's concurrency limit. The
    /// worker normalizes the handler's return and invokes `continuation`
    /// — unless the instance was cancelled first, in which case the
    /// completion is dropped. Successful completions persist their
    /// terminal state here; failures are finalized by the continuation,
    /// which owns the retry decision.
    pub(crate) async fn submit(
        &self,
        submit: SubmitRequest,
        continuation: Continuation,
    ) -> Result<(), EngineError> {
        let SubmitRequest {
            instance_id,
            step_id,
            request,
            node_has_edges,
            handler,
            ctx,
            cancel,
        } = submit;
        let task_id = request.task_id.clone();

        let Ok(queue_permit) = self.queue.clone().try_acquire_owned() else {
            warn!(%task_id, "async task rejected: queue full");
            return Err(EngineError::QueueFull);
        };

        let mut state = AsyncStepState::new(
            task_id.clone(),
            instance_id,
            step_id.clone(),
            request.immediate_data.clone(),
        );
        self.async_states.save(&state).await?;

        self.tracker.track(
            task_id.clone(),
            ExecutionEvent::AsyncTaskScheduled {
                instance_id,
                step_id,
                task_id: task_id.clone(),
            },
        );
        let reporter = Arc::new(self.tracker.reporter(task_id.clone()));

        let prebuilt = self.registered.lock().remove(&task_id);
        let concurrency = self.concurrency.clone();
        let async_states = self.async_states.clone();
        let tracker = self.tracker.clone();
        let worker_task_id = task_id.clone();
        let args = request.task_args.clone();
        let estimated_duration = request.estimated_duration;

        let handle = tokio::spawn(async move {
            let _queue_permit = queue_permit;
            let Ok(_permit) = concurrency.acquire_owned().await else {
                // Pool closed during shutdown.
                return;
            };
            if cancel.is_cancelled() {
                state.mark_cancelled();
                let _ = async_states.save(&state).await;
                tracker.on_cancelled(&worker_task_id);
                return;
            }

            state.mark_in_progress();
            let _ = async_states.save(&state).await;

            let future: RegisteredFuture = match prebuilt {
                Some(future) => future,
                None => match handler {
                    Some(handler) => {
                        Box::pin(async move { handler.execute(args, ctx, reporter).await })
                    }
                    None => Box::pin(async {
                        Err(StepError::handler("step has no async handler"))
                    }),
                },
            };

            let outcome = match estimated_duration {
                Some(budget) => match tokio::time::timeout(budget, future).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::timeout(format!(
                        "async task exceeded {}ms budget",
                        budget.as_millis()
                    ))),
                },
                None => future.await,
            };

            if cancel.is_cancelled() {
                // Cancel wins over completion; the result is dropped.
                debug!(task_id = %worker_task_id, "dropping post-cancel async completion");
                state.mark_cancelled();
                let _ = async_states.save(&state).await;
                tracker.on_cancelled(&worker_task_id);
                return;
            }

            let step_result = normalize(outcome, node_has_edges);
            match &step_result {
                StepResult::Fail { error } => {
                    // Failure bookkeeping (task state, progress, retry
                    // decision) belongs to the continuation, which knows
                    // the step's retry policy.
                    debug!(task_id = %worker_task_id, %error, "async task failed");
                }
                other => {
                    let snapshot = result_snapshot(other);
                    state.mark_completed(snapshot.clone());
                    if let Err(e) = async_states.save(&state).await {
                        error!(task_id = %worker_task_id, %e, "failed to persist async state");
                    }
                    tracker.on_complete(&worker_task_id, snapshot);
                }
            }

            continuation(step_result).await;
        });

        self.running
            .entry(instance_id)
            .or_default()
            .push((task_id, handle));
        Ok(())
    }

    /// Cancel all in-flight tasks for an instance, marking their states
    /// cancelled and publishing error events.
    pub(crate) async fn cancel_instance(&self, instance_id: InstanceId) {
        let Some((_, tasks)) = self.running.remove(&instance_id) else {
            return;
        };
        for (task_id, handle) in tasks {
            handle.abort();
            if let Ok(mut state) = self.async_states.load(&task_id).await {
                if !state.state.is_terminal() {
                    state.mark_cancelled();
                    let _ = self.async_states.save(&state).await;
                    self.tracker.on_cancelled(&task_id);
                }
            }
        }
    }

    /// Abort every in-flight task (engine shutdown).
    pub(crate) fn abort_all(&self) {
        let instances: Vec<InstanceId> = self.running.iter().map(|e| *e.key()).collect();
        for instance_id in instances {
            if let Some((_, tasks)) = self.running.remove(&instance_id) {
                for (_, handle) in tasks {
                    handle.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for AsyncTaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTaskManager")
            .field("registered", &self.registered.lock().len())
            .field("instances_with_tasks", &self.running.len())
            .finish_non_exhaustive()
    }
}

/// Normalize an async handler's return into a `StepResult`.
///
/// Plain values become `Continue` when the node has outgoing edges and
/// `Finish` otherwise; explicit step results pass through; errors become
/// `Fail`.
fn normalize(outcome: Result<AsyncOutput, StepError>, node_has_edges: bool) -> StepResult {
    match outcome {
        Ok(AsyncOutput::Step(result)) => result,
        Ok(AsyncOutput::Value(value)) => {
            if node_has_edges {
                StepResult::continue_with(value)
            } else {
                StepResult::finish(value)
            }
        }
        Err(error) => StepResult::fail(error),
    }
}

/// The value persisted as the task's result snapshot.
fn result_snapshot(result: &StepResult) -> Value {
    match result {
        StepResult::Continue { data } => data.clone(),
        StepResult::Finish { result } => result.clone(),
        StepResult::Branch { event } => event.payload.clone(),
        _ => Value::Null,
    }
}
