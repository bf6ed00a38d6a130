//! The workflow execution engine.
//!
//! Drives instances through their graphs one step transition at a time:
//! resolve the input, invoke the step (through the retry layer and any
//! circuit breaker), interpret the returned result, checkpoint, repeat.
//! `Suspend` and `Async` stop the execution path; everything else returns
//! synchronously.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use strand_core::{ASYNC_FUTURE, InstanceId, StepKey, WorkflowKey};
use strand_execution::{
    ErrorInfo, InstanceStatus, JournalEntry, SuspensionData, WorkflowInstance,
};
use strand_resilience::{
    AbortReason, CircuitBreaker, CircuitBreakerConfig, RetryDecision, RetryPolicy,
};
use strand_step::{
    AsyncRequest, AttemptRecord, RetryContext, StepContext, StepError, StepResult, ValueKind,
    codes,
};
use strand_storage::{
    AsyncStateRepository, InMemoryAsyncStateRepository, InMemoryStateRepository, StateRepository,
};
use strand_telemetry::{EventBus, ExecutionEvent, MetricsRegistry};
use strand_workflow::{StepNode, WorkflowGraph};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::progress::ProgressTracker;
use crate::registry::WorkflowRegistry;
use crate::result::{Completion, Execution, Status};
use crate::tasks::{AsyncTaskManager, Continuation, RegisteredFuture, SubmitRequest};

/// What the run loop does next.
enum NextAction {
    /// Invoke the current step with this input.
    Invoke(Value),
    /// Interpret an already-produced result (async continuation).
    Apply(StepResult),
}

/// How a run segment ended.
pub(crate) enum RunOutcome {
    /// The instance completed.
    Completed,
    /// The instance failed.
    Failed,
    /// The instance suspended awaiting external input.
    Suspended,
    /// The execution path stopped; an async task carries on.
    AsyncPending,
    /// Cancellation or shutdown was observed; the canceller persists the
    /// terminal state.
    Interrupted,
}

/// The workflow execution engine.
///
/// Construct with a config (in-memory repositories by default), register
/// compiled graphs, then `execute`/`resume`/`status`/`cancel`. Within a
/// single instance, step transitions are strictly serialized by a
/// per-instance lock; across instances execution is fully parallel.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    workflows: WorkflowRegistry,
    repository: Arc<dyn StateRepository>,
    async_states: Arc<dyn AsyncStateRepository>,
    tracker: Arc<ProgressTracker>,
    tasks: AsyncTaskManager,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    locks: DashMap<InstanceId, Arc<AsyncMutex<()>>>,
    cancellations: DashMap<InstanceId, CancellationToken>,
    completions: DashMap<InstanceId, watch::Sender<Completion>>,
    breakers: DashMap<StepKey, Arc<CircuitBreaker>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("workflows", &self.workflows.keys())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine with in-memory repositories.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_repositories(
            config,
            Arc::new(InMemoryStateRepository::new()),
            Arc::new(InMemoryAsyncStateRepository::new()),
        )
    }

    /// Create an engine over pluggable repositories.
    ///
    /// An engine constructed over an existing repository picks up where a
    /// previous process left off: suspended instances resume from their
    /// persisted state.
    #[must_use]
    pub fn with_repositories(
        config: EngineConfig,
        repository: Arc<dyn StateRepository>,
        async_states: Arc<dyn AsyncStateRepository>,
    ) -> Self {
        let events = Arc::new(EventBus::new(config.event_capacity));
        let tracker = Arc::new(ProgressTracker::new(events.clone()));
        let tasks = AsyncTaskManager::new(
            config.max_concurrent_tasks,
            config.queue_capacity,
            async_states.clone(),
            tracker.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                workflows: WorkflowRegistry::new(),
                repository,
                async_states,
                tracker,
                tasks,
                events,
                metrics: Arc::new(MetricsRegistry::new()),
                locks: DashMap::new(),
                cancellations: DashMap::new(),
                completions: DashMap::new(),
                breakers: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a compiled workflow graph.
    pub fn register(&self, graph: WorkflowGraph) -> Arc<WorkflowGraph> {
        self.inner.workflows.register(graph)
    }

    /// The engine's event bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    /// The engine's metrics registry.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.inner.metrics.clone()
    }

    /// The engine's progress tracker.
    #[must_use]
    pub fn tracker(&self) -> Arc<ProgressTracker> {
        self.inner.tracker.clone()
    }

    /// Register a pre-built future to back an upcoming async hand-off
    /// under the same task id.
    pub fn register_future(&self, task_id: strand_core::TaskKey, future: RegisteredFuture) {
        self.inner.tasks.register_future(task_id, future);
    }

    /// Start a new instance of a registered workflow.
    ///
    /// Runs synchronously on the caller's task until the instance
    /// completes, fails, suspends, or hands off async work.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowKey,
        input: Value,
    ) -> Result<Execution, EngineError> {
        let inner = &self.inner;
        let graph = inner
            .workflows
            .get(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.clone(),
            })?;

        let instance_id = InstanceId::v4();
        let mut instance = WorkflowInstance::new(
            instance_id,
            workflow_id.clone(),
            graph.initial_step().clone(),
            input.clone(),
        );
        instance.record(JournalEntry::InstanceStarted {
            timestamp: Utc::now(),
        });
        inner.repository.save(&instance).await?;
        inner.set_completion(instance_id, Completion::Pending);
        inner.events.emit(ExecutionEvent::InstanceStarted {
            instance_id,
            workflow_id: workflow_id.clone(),
        });
        inner.metrics.counter("instances_started_total").inc();
        info!(%instance_id, workflow = %workflow_id, "executing workflow");

        let lock = inner.lock_for(instance_id);
        let guard = lock.lock().await;
        let cancel = inner.cancellation_for(instance_id);
        let outcome = inner
            .run_locked(&graph, &mut instance, NextAction::Invoke(input), None, &cancel)
            .await?;
        drop(guard);

        Ok(inner.execution_handle(
            instance_id,
            workflow_id.clone(),
            matches!(outcome, RunOutcome::AsyncPending),
        ))
    }

    /// Resume a suspended instance with external input.
    ///
    /// The payload must satisfy the suspension's declared input kind; a
    /// mismatch is an error and the instance stays suspended. The
    /// suspended step is re-invoked with the payload as its input, with
    /// its original upstream input available through the step context.
    pub async fn resume(
        &self,
        instance_id: InstanceId,
        resume_input: Value,
    ) -> Result<Execution, EngineError> {
        let inner = &self.inner;
        let lock = inner.lock_for(instance_id);
        let guard = lock.lock().await;

        let mut instance = inner.repository.load(instance_id).await?;
        if instance.is_terminal() {
            return Err(EngineError::Terminal {
                status: instance.status,
            });
        }
        if instance.status != InstanceStatus::Suspended {
            return Err(EngineError::NotSuspended {
                status: instance.status,
            });
        }
        let suspension = instance.suspension.clone().ok_or_else(|| {
            EngineError::Internal("suspended instance missing suspension data".into())
        })?;
        let graph = inner.workflows.get(&instance.workflow_id).ok_or_else(|| {
            EngineError::WorkflowNotFound {
                workflow_id: instance.workflow_id.clone(),
            }
        })?;

        if !graph.contains(&suspension.suspended_step) {
            // The graph changed underneath the suspension; fatal.
            let message = format!(
                "suspended step '{}' no longer exists in workflow '{}'",
                suspension.suspended_step,
                graph.id()
            );
            let error = ErrorInfo::new("routing", message.clone())
                .at_step(suspension.suspended_step.clone());
            inner.fail_instance(&mut instance, error).await?;
            return Err(EngineError::Routing { message });
        }

        if !suspension.accepts_resume_input(&resume_input) {
            // The instance stays suspended; the caller may try again.
            return Err(EngineError::ResumeType {
                expected: suspension.resume_input_kind,
                actual: ValueKind::of(&resume_input),
            });
        }

        let data = instance.resume_to_running()?;
        instance.record(JournalEntry::Resumed {
            timestamp: Utc::now(),
            step_id: data.suspended_step.clone(),
        });
        inner.checkpoint(&mut instance).await?;
        inner.events.emit(ExecutionEvent::InstanceResumed {
            instance_id,
            step_id: data.suspended_step.clone(),
        });
        inner.metrics.counter("instances_resumed_total").inc();
        info!(%instance_id, step = %data.suspended_step, "resuming instance");

        let workflow_id = instance.workflow_id.clone();
        let cancel = inner.cancellation_for(instance_id);
        let outcome = inner
            .run_locked(
                &graph,
                &mut instance,
                NextAction::Invoke(resume_input),
                Some(data.original_input),
                &cancel,
            )
            .await?;
        drop(guard);

        Ok(inner.execution_handle(
            instance_id,
            workflow_id,
            matches!(outcome, RunOutcome::AsyncPending),
        ))
    }

    /// Point-in-time status of an instance, including progress of its
    /// latest async task.
    pub async fn status(&self, instance_id: InstanceId) -> Result<Status, EngineError> {
        let instance = self.inner.repository.load(instance_id).await?;
        let tasks = self.inner.async_states.list_by_instance(instance_id).await?;
        let execution = tasks
            .last()
            .and_then(|state| self.inner.tracker.execution(&state.task_id));

        Ok(Status {
            state: instance.status,
            percent: execution.as_ref().map(|e| e.percent),
            message: execution.as_ref().map(|e| e.message.clone()),
            last_event: execution.and_then(|e| e.last_event),
            error: instance.error,
        })
    }

    /// The instance's current result: the final result when terminal,
    /// otherwise the latest async task's result snapshot or immediate
    /// data, if any.
    pub async fn current_result(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<Value>, EngineError> {
        let instance = self.inner.repository.load(instance_id).await?;
        if let Some(result) = instance.context.final_result() {
            return Ok(Some(result.clone()));
        }
        let tasks = self.inner.async_states.list_by_instance(instance_id).await?;
        Ok(tasks
            .last()
            .map(|state| state.result.clone().unwrap_or_else(|| state.immediate_data.clone())))
    }

    /// Cancel an instance.
    ///
    /// Cancels in-flight async tasks and refuses further execution.
    /// Returns `true` the first time; repeated cancels of a terminal
    /// instance return `false`.
    pub async fn cancel(&self, instance_id: InstanceId) -> Result<bool, EngineError> {
        self.inner.cancel_instance(instance_id).await
    }

    /// Instances currently in the given status.
    pub async fn list_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        Ok(self.inner.repository.list_by_status(status).await?)
    }

    /// Shut the engine down: stop in-flight runs and abort async tasks.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        self.inner.shutdown.cancel();
        for entry in &self.inner.cancellations {
            entry.value().cancel();
        }
        self.inner.tasks.abort_all();
    }
}

impl EngineInner {
    fn lock_for(&self, instance_id: InstanceId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(instance_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn cancellation_for(&self, instance_id: InstanceId) -> CancellationToken {
        self.cancellations
            .entry(instance_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    fn completion_sender(&self, instance_id: InstanceId) -> watch::Sender<Completion> {
        self.completions
            .entry(instance_id)
            .or_insert_with(|| watch::channel(Completion::Pending).0)
            .clone()
    }

    fn set_completion(&self, instance_id: InstanceId, completion: Completion) {
        self.completion_sender(instance_id).send_replace(completion);
    }

    pub(crate) fn execution_handle(
        self: &Arc<Self>,
        instance_id: InstanceId,
        workflow_id: WorkflowKey,
        is_async: bool,
    ) -> Execution {
        let receiver = self.completion_sender(instance_id).subscribe();
        Execution::new(instance_id, workflow_id, is_async, self.clone(), receiver)
    }

    /// Persist the instance, bumping its version first.
    async fn checkpoint(&self, instance: &mut WorkflowInstance) -> Result<(), EngineError> {
        instance.touch();
        self.repository.save(instance).await?;
        Ok(())
    }

    fn breaker_for(&self, step: &StepKey, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(step.clone())
            .or_insert_with(|| match CircuitBreaker::new(config.clone()) {
                Ok(breaker) => Arc::new(breaker),
                Err(e) => {
                    warn!(%step, %e, "invalid circuit breaker config; using defaults");
                    Arc::new(CircuitBreaker::with_defaults())
                }
            })
            .clone()
    }

    fn step_context(
        &self,
        instance: &WorkflowInstance,
        step: &StepKey,
        cancel: &CancellationToken,
        original: Option<Value>,
        retry: Option<RetryContext>,
    ) -> StepContext {
        let (outputs, values) = instance.context.snapshot();
        let mut ctx = StepContext::new(instance.instance_id, instance.workflow_id.clone(), step.clone())
            .with_trigger_data(instance.context.trigger_data().clone())
            .with_snapshot(outputs, values)
            .with_cancellation(cancel.clone());
        if let Some(original) = original {
            ctx = ctx.with_original_input(original);
        }
        if let Some(retry) = retry {
            ctx = ctx.with_retry(retry);
        }
        ctx
    }

    /// Drive the instance until it suspends, hands off async work, or
    /// reaches a terminal state. The caller holds the instance lock.
    async fn run_locked(
        self: &Arc<Self>,
        graph: &Arc<WorkflowGraph>,
        instance: &mut WorkflowInstance,
        first: NextAction,
        resume_original: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let mut action = first;
        let mut original = resume_original;

        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                // The canceller persists the terminal state.
                debug!(instance_id = %instance.instance_id, "run interrupted");
                return Ok(RunOutcome::Interrupted);
            }

            let step_key = instance.current_step.clone();
            let Some(node) = graph.node(&step_key) else {
                let error = ErrorInfo::new(
                    codes::ROUTING,
                    format!("step '{step_key}' not found in workflow '{}'", graph.id()),
                )
                .at_step(step_key);
                return self.fail_instance(instance, error).await;
            };

            let (result, current_input) = match action {
                NextAction::Invoke(input) => {
                    let result = self
                        .invoke_with_retry(node, input.clone(), instance, original.take(), cancel)
                        .await;
                    (result, input)
                }
                NextAction::Apply(result) => (result, Value::Null),
            };

            if cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }

            match result {
                StepResult::Continue { data } => {
                    instance.context.set_step_output(step_key.clone(), data.clone());
                    instance.record(JournalEntry::StepCompleted {
                        timestamp: Utc::now(),
                        step_id: step_key.clone(),
                        variant: "continue".into(),
                    });
                    self.events.emit(ExecutionEvent::StepCompleted {
                        instance_id: instance.instance_id,
                        step_id: step_key.clone(),
                        variant: "continue".into(),
                    });

                    let edges = graph.outgoing_edges(&step_key);
                    if edges.is_empty() {
                        // Continue from a terminal-capable node finishes the run.
                        return self.complete_instance(instance, data).await;
                    }
                    let ctx = self.step_context(instance, &step_key, cancel, None, None);
                    let Some(edge) = edges.iter().find(|edge| edge.accepts(&ctx, &data)) else {
                        let error = ErrorInfo::new(
                            codes::ROUTING,
                            format!("no matching edge out of step '{step_key}'"),
                        )
                        .at_step(step_key);
                        return self.fail_instance(instance, error).await;
                    };
                    instance.advance_to(edge.target.clone());
                    self.checkpoint(instance).await?;
                    action = NextAction::Invoke(data);
                }

                StepResult::Branch { event } => {
                    instance
                        .context
                        .set_step_output(step_key.clone(), event.payload.clone());
                    instance.record(JournalEntry::StepCompleted {
                        timestamp: Utc::now(),
                        step_id: step_key.clone(),
                        variant: "branch".into(),
                    });
                    self.events.emit(ExecutionEvent::StepCompleted {
                        instance_id: instance.instance_id,
                        step_id: step_key.clone(),
                        variant: "branch".into(),
                    });

                    let Some(target) = graph.branch_target(&event.event_type) else {
                        let error = ErrorInfo::new(
                            codes::ROUTING,
                            format!(
                                "no branch target for event type '{}' from step '{step_key}'",
                                event.event_type
                            ),
                        )
                        .at_step(step_key);
                        return self.fail_instance(instance, error).await;
                    };
                    instance.advance_to(target.clone());
                    self.checkpoint(instance).await?;
                    action = NextAction::Invoke(event.payload);
                }

                StepResult::Suspend(request) => {
                    let original_input = request.original_input.unwrap_or(current_input);
                    let data = SuspensionData::new(
                        step_key.clone(),
                        request.prompt.clone(),
                        original_input,
                        request.resume_input_kind,
                    )
                    .with_metadata(request.metadata);
                    instance.record(JournalEntry::Suspended {
                        timestamp: Utc::now(),
                        step_id: step_key.clone(),
                        prompt: request.prompt.clone(),
                    });
                    instance.suspend(data)?;
                    self.checkpoint(instance).await?;
                    self.events.emit(ExecutionEvent::InstanceSuspended {
                        instance_id: instance.instance_id,
                        step_id: step_key,
                        prompt: request.prompt,
                    });
                    self.metrics.counter("instances_suspended_total").inc();
                    self.set_completion(instance.instance_id, Completion::Suspended);
                    return Ok(RunOutcome::Suspended);
                }

                StepResult::Async(request) => {
                    let task_id = request.task_id.clone();
                    instance
                        .context
                        .set_value(ASYNC_FUTURE, Value::String(task_id.to_string()));
                    instance.record(JournalEntry::AsyncScheduled {
                        timestamp: Utc::now(),
                        step_id: step_key.clone(),
                        task_id,
                    });
                    self.checkpoint(instance).await?;
                    return self
                        .submit_async(graph, instance, node, &step_key, request, 1, cancel)
                        .await;
                }

                StepResult::Finish { result } => {
                    instance.record(JournalEntry::StepCompleted {
                        timestamp: Utc::now(),
                        step_id: step_key,
                        variant: "finish".into(),
                    });
                    return self.complete_instance(instance, result).await;
                }

                StepResult::Fail { error } => {
                    let info =
                        ErrorInfo::new(error.code.clone(), error.message.clone()).at_step(step_key);
                    return self.fail_instance(instance, info).await;
                }
            }
        }
    }

    /// Invoke a step through its circuit breaker and retry policy.
    ///
    /// Always returns a `StepResult`: failures that exhaust the policy (or
    /// are not retryable) come back as `Fail`.
    async fn invoke_with_retry(
        &self,
        node: &StepNode,
        input: Value,
        instance: &mut WorkflowInstance,
        original: Option<Value>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let policy = node.retry_policy.clone().unwrap_or_else(RetryPolicy::none);
        let breaker = node
            .circuit_breaker
            .as_ref()
            .map(|config| self.breaker_for(&node.id, config));

        let first_attempt_at = Utc::now();
        let mut previous_attempts: Vec<AttemptRecord> = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            if let Some(breaker) = &breaker {
                if let Err(e) = breaker.try_acquire() {
                    self.metrics.counter("circuit_rejections_total").inc();
                    return StepResult::fail(StepError::circuit_open(e.to_string()));
                }
            }

            let attempt_started_at = Utc::now();
            instance.record(JournalEntry::StepStarted {
                timestamp: attempt_started_at,
                step_id: node.id.clone(),
                attempt,
            });
            self.events.emit(ExecutionEvent::StepStarted {
                instance_id: instance.instance_id,
                step_id: node.id.clone(),
                attempt,
            });
            self.metrics.counter("step_attempts_total").inc();

            let retry = (attempt > 1).then(|| RetryContext {
                step_id: node.id.clone(),
                attempt_number: attempt,
                max_attempts: policy.max_attempts,
                previous_attempts: previous_attempts.clone(),
                first_attempt_at,
                current_attempt_at: attempt_started_at,
            });
            let ctx = self.step_context(instance, &node.id, cancel, original.clone(), retry);

            let started = Instant::now();
            let invocation =
                AssertUnwindSafe(node.handler.execute(input.clone(), ctx)).catch_unwind();
            let outcome: Result<StepResult, StepError> = match self.config.default_step_timeout {
                Some(budget) => tokio::select! {
                    () = cancel.cancelled() => Err(StepError::cancelled()),
                    timed = tokio::time::timeout(budget, invocation) => match timed {
                        Err(_) => Err(StepError::timeout(format!(
                            "step exceeded {}ms budget",
                            budget.as_millis()
                        ))),
                        Ok(Err(_)) => Err(StepError::handler("step panicked")),
                        Ok(Ok(result)) => result,
                    },
                },
                None => tokio::select! {
                    () = cancel.cancelled() => Err(StepError::cancelled()),
                    joined = invocation => match joined {
                        Err(_) => Err(StepError::handler("step panicked")),
                        Ok(result) => result,
                    },
                },
            };
            self.metrics
                .histogram(&format!("step_duration_seconds.{}", node.id))
                .observe(started.elapsed().as_secs_f64());

            let result = match outcome {
                Ok(result) => result,
                Err(error) => StepResult::fail(error),
            };

            match result {
                StepResult::Fail { error } => {
                    if let Some(breaker) = &breaker {
                        breaker.record_failure();
                    }
                    self.metrics.counter("step_failures_total").inc();
                    instance.record(JournalEntry::StepFailed {
                        timestamp: Utc::now(),
                        step_id: node.id.clone(),
                        error: error.to_string(),
                    });
                    self.events.emit(ExecutionEvent::StepFailed {
                        instance_id: instance.instance_id,
                        step_id: node.id.clone(),
                        error: error.to_string(),
                    });

                    if error.is(codes::CANCELLED) {
                        return StepResult::fail(error);
                    }

                    match policy.decide(error.code(), attempt) {
                        RetryDecision::Retry { delay } => {
                            warn!(
                                step = %node.id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "retrying step"
                            );
                            previous_attempts.push(AttemptRecord {
                                attempt_number: attempt,
                                error: error.clone(),
                                started_at: attempt_started_at,
                                completed_at: Utc::now(),
                            });
                            instance.record(JournalEntry::StepRetrying {
                                timestamp: Utc::now(),
                                step_id: node.id.clone(),
                                attempt: attempt + 1,
                                delay_ms: delay.as_millis() as u64,
                            });
                            self.events.emit(ExecutionEvent::StepRetrying {
                                instance_id: instance.instance_id,
                                step_id: node.id.clone(),
                                attempt: attempt + 1,
                                delay_ms: delay.as_millis() as u64,
                            });
                            self.metrics
                                .histogram(&format!("retry_delay_seconds.{}", node.id))
                                .observe(delay.as_secs_f64());

                            tokio::select! {
                                () = cancel.cancelled() => {
                                    return StepResult::fail(StepError::cancelled());
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                            attempt += 1;
                        }
                        RetryDecision::Abort { reason } => {
                            if reason == AbortReason::ExhaustedAttempts {
                                self.metrics.counter("retries_exhausted_total").inc();
                            }
                            debug!(step = %node.id, attempt, ?reason, "step failure promoted");
                            return StepResult::fail(error);
                        }
                    }
                }
                success => {
                    if let Some(breaker) = &breaker {
                        breaker.record_success();
                    }
                    self.metrics.counter("step_successes_total").inc();
                    return success;
                }
            }
        }
    }

    /// Hand an async request to the task manager, wiring the settled
    /// result back into [`continue_after_async`] with the attempt number.
    /// The caller holds the instance lock.
    async fn submit_async(
        self: &Arc<Self>,
        graph: &Arc<WorkflowGraph>,
        instance: &mut WorkflowInstance,
        node: &StepNode,
        step_key: &StepKey,
        request: AsyncRequest,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let submit = SubmitRequest {
            instance_id: instance.instance_id,
            step_id: step_key.clone(),
            node_has_edges: !graph.outgoing_edges(step_key).is_empty(),
            handler: node.async_handler.clone(),
            ctx: self.step_context(instance, step_key, cancel, None, None),
            cancel: cancel.clone(),
            request: request.clone(),
        };
        let engine = self.clone();
        let continuation_graph = graph.clone();
        let continuation_step = step_key.clone();
        let instance_id = instance.instance_id;
        let continuation: Continuation = Box::new(move |result| {
            Box::pin(async move {
                engine
                    .continue_after_async(
                        continuation_graph,
                        instance_id,
                        continuation_step,
                        request,
                        attempt,
                        result,
                    )
                    .await;
            })
        });

        match self.tasks.submit(submit, continuation).await {
            Ok(()) => {
                self.set_completion(instance.instance_id, Completion::Pending);
                Ok(RunOutcome::AsyncPending)
            }
            Err(EngineError::QueueFull) => {
                let error = ErrorInfo::new("queue_full", "async task queue is full")
                    .at_step(step_key.clone());
                self.fail_instance(instance, error).await
            }
            Err(other) => Err(other),
        }
    }

    /// Continue an instance after its async task settled. Runs on the
    /// worker's task; acquires the instance lock.
    ///
    /// A settled `Fail` goes through the step's retry policy exactly like
    /// a synchronous failure: listed/exhausted codes promote to instance
    /// failure, everything else backs off and re-runs the async work.
    pub(crate) async fn continue_after_async(
        self: Arc<Self>,
        graph: Arc<WorkflowGraph>,
        instance_id: InstanceId,
        step_key: StepKey,
        request: AsyncRequest,
        attempt: u32,
        result: StepResult,
    ) {
        let result = match result {
            StepResult::Fail { error } => {
                self.handle_async_failure(graph, instance_id, step_key, request, attempt, error)
                    .await;
                return;
            }
            other => other,
        };

        let task_id = request.task_id.clone();
        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;

        let mut instance = match self.repository.load(instance_id).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(%instance_id, %e, "failed to load instance for async continuation");
                return;
            }
        };
        if instance.is_terminal() {
            // Cancel (or a concurrent failure) won; the completion is dropped.
            debug!(%instance_id, %task_id, "discarding async completion for terminal instance");
            return;
        }

        if let Some(config) = graph.node(&step_key).and_then(|n| n.circuit_breaker.as_ref()) {
            self.breaker_for(&step_key, config).record_success();
        }
        instance.record(JournalEntry::AsyncSettled {
            timestamp: Utc::now(),
            task_id,
            variant: result.variant().into(),
        });
        let cancel = self.cancellation_for(instance_id);
        let fut: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<RunOutcome, EngineError>> + Send + '_>,
        > = Box::pin(self.run_locked(&graph, &mut instance, NextAction::Apply(result), None, &cancel));
        if let Err(e) = fut.await {
            error!(%instance_id, %e, "async continuation failed");
        }
    }

    /// Apply the step's retry policy to a failed async attempt.
    ///
    /// Attempt bookkeeping (journal, events, breaker, metrics) happens
    /// under the instance lock; the backoff sleep does not hold it, per
    /// the shared-resource policy for retry delays.
    async fn handle_async_failure(
        self: Arc<Self>,
        graph: Arc<WorkflowGraph>,
        instance_id: InstanceId,
        step_key: StepKey,
        request: AsyncRequest,
        attempt: u32,
        error: StepError,
    ) {
        let task_id = request.task_id.clone();
        let delay = {
            let lock = self.lock_for(instance_id);
            let _guard = lock.lock().await;

            let mut instance = match self.repository.load(instance_id).await {
                Ok(instance) => instance,
                Err(e) => {
                    error!(%instance_id, %e, "failed to load instance for async failure");
                    return;
                }
            };
            if instance.is_terminal() {
                debug!(%instance_id, %task_id, "discarding async failure for terminal instance");
                return;
            }
            let Some(node) = graph.node(&step_key) else {
                let info = ErrorInfo::new(
                    codes::ROUTING,
                    format!("step '{step_key}' not found in workflow '{}'", graph.id()),
                )
                .at_step(step_key.clone());
                let _ = self.fail_instance(&mut instance, info).await;
                return;
            };

            // This attempt's task record and progress cycle are terminal;
            // a retry starts a fresh one under the same task id.
            if let Ok(mut state) = self.async_states.load(&task_id).await {
                if !state.state.is_terminal() {
                    state.mark_failed(error.to_string());
                    let _ = self.async_states.save(&state).await;
                }
            }
            self.tracker.on_error(&task_id, &error.to_string());

            let breaker = node
                .circuit_breaker
                .as_ref()
                .map(|config| self.breaker_for(&step_key, config));
            if let Some(breaker) = &breaker {
                breaker.record_failure();
            }
            self.metrics.counter("step_failures_total").inc();
            instance.record(JournalEntry::AsyncSettled {
                timestamp: Utc::now(),
                task_id: task_id.clone(),
                variant: "fail".into(),
            });
            instance.record(JournalEntry::StepFailed {
                timestamp: Utc::now(),
                step_id: step_key.clone(),
                error: error.to_string(),
            });
            self.events.emit(ExecutionEvent::StepFailed {
                instance_id,
                step_id: step_key.clone(),
                error: error.to_string(),
            });

            let policy = node.retry_policy.clone().unwrap_or_else(RetryPolicy::none);
            match policy.decide(error.code(), attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        step = %step_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying async step"
                    );
                    instance.record(JournalEntry::StepRetrying {
                        timestamp: Utc::now(),
                        step_id: step_key.clone(),
                        attempt: attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                    });
                    self.events.emit(ExecutionEvent::StepRetrying {
                        instance_id,
                        step_id: step_key.clone(),
                        attempt: attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                    });
                    self.metrics
                        .histogram(&format!("retry_delay_seconds.{step_key}"))
                        .observe(delay.as_secs_f64());
                    if let Err(e) = self.checkpoint(&mut instance).await {
                        error!(%instance_id, %e, "failed to checkpoint async retry");
                        return;
                    }
                    delay
                }
                RetryDecision::Abort { reason } => {
                    if reason == AbortReason::ExhaustedAttempts {
                        self.metrics.counter("retries_exhausted_total").inc();
                    }
                    debug!(step = %step_key, attempt, ?reason, "async step failure promoted");
                    let info = ErrorInfo::new(error.code.clone(), error.message.clone())
                        .at_step(step_key.clone());
                    if let Err(e) = self.fail_instance(&mut instance, info).await {
                        error!(%instance_id, %e, "failed to persist async failure");
                    }
                    return;
                }
            }
        };

        // Back off without holding the instance lock.
        let cancel = self.cancellation_for(instance_id);
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        self.resubmit_async(graph, instance_id, step_key, request, attempt + 1)
            .await;
    }

    /// Re-run a failed async attempt after its backoff delay.
    async fn resubmit_async(
        self: Arc<Self>,
        graph: Arc<WorkflowGraph>,
        instance_id: InstanceId,
        step_key: StepKey,
        request: AsyncRequest,
        attempt: u32,
    ) {
        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;
        let cancel = self.cancellation_for(instance_id);
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return;
        }
        let mut instance = match self.repository.load(instance_id).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(%instance_id, %e, "failed to load instance for async retry");
                return;
            }
        };
        if instance.is_terminal() {
            debug!(%instance_id, "dropping async retry for terminal instance");
            return;
        }
        let Some(node) = graph.node(&step_key) else {
            return;
        };

        // The breaker guards every attempt, re-submissions included.
        if let Some(config) = node.circuit_breaker.as_ref() {
            let breaker = self.breaker_for(&step_key, config);
            if let Err(e) = breaker.try_acquire() {
                self.metrics.counter("circuit_rejections_total").inc();
                let info =
                    ErrorInfo::new(codes::CIRCUIT_OPEN, e.to_string()).at_step(step_key.clone());
                if let Err(e) = self.fail_instance(&mut instance, info).await {
                    error!(%instance_id, %e, "failed to persist circuit rejection");
                }
                return;
            }
        }

        instance.record(JournalEntry::StepStarted {
            timestamp: Utc::now(),
            step_id: step_key.clone(),
            attempt,
        });
        self.events.emit(ExecutionEvent::StepStarted {
            instance_id,
            step_id: step_key.clone(),
            attempt,
        });
        if let Err(e) = self.checkpoint(&mut instance).await {
            error!(%instance_id, %e, "failed to checkpoint async retry");
            return;
        }

        if let Err(e) = self
            .submit_async(&graph, &mut instance, node, &step_key, request, attempt, &cancel)
            .await
        {
            error!(%instance_id, %e, "failed to resubmit async task");
        }
    }

    async fn complete_instance(
        &self,
        instance: &mut WorkflowInstance,
        result: Value,
    ) -> Result<RunOutcome, EngineError> {
        instance.record(JournalEntry::InstanceFinished {
            timestamp: Utc::now(),
            status: InstanceStatus::Completed,
        });
        instance.complete(result.clone())?;
        self.checkpoint(instance).await?;

        let duration_ms = (Utc::now() - instance.created_at).num_milliseconds().max(0) as u64;
        self.events.emit(ExecutionEvent::InstanceCompleted {
            instance_id: instance.instance_id,
            duration_ms,
        });
        self.metrics.counter("instances_completed_total").inc();
        self.set_completion(instance.instance_id, Completion::Completed(result));
        info!(instance_id = %instance.instance_id, duration_ms, "instance completed");
        Ok(RunOutcome::Completed)
    }

    async fn fail_instance(
        &self,
        instance: &mut WorkflowInstance,
        error: ErrorInfo,
    ) -> Result<RunOutcome, EngineError> {
        instance.record(JournalEntry::InstanceFinished {
            timestamp: Utc::now(),
            status: InstanceStatus::Failed,
        });
        instance.fail(error.clone())?;
        self.checkpoint(instance).await?;

        self.events.emit(ExecutionEvent::InstanceFailed {
            instance_id: instance.instance_id,
            error: error.message.clone(),
        });
        self.metrics.counter("instances_failed_total").inc();
        self.set_completion(instance.instance_id, Completion::Failed(error.clone()));
        warn!(instance_id = %instance.instance_id, code = %error.code, "instance failed");
        Ok(RunOutcome::Failed)
    }

    pub(crate) async fn cancel_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<bool, EngineError> {
        // Cancel the token first so an in-flight run releases the
        // instance lock promptly, then abort async workers.
        if let Some(token) = self.cancellations.get(&instance_id) {
            token.cancel();
        }
        self.tasks.cancel_instance(instance_id).await;

        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;
        let mut instance = self.repository.load(instance_id).await?;
        if instance.is_terminal() {
            return Ok(false);
        }
        instance.record(JournalEntry::CancellationRequested {
            timestamp: Utc::now(),
        });
        instance.record(JournalEntry::InstanceFinished {
            timestamp: Utc::now(),
            status: InstanceStatus::Cancelled,
        });
        instance.cancel()?;
        self.checkpoint(&mut instance).await?;

        self.events
            .emit(ExecutionEvent::InstanceCancelled { instance_id });
        self.metrics.counter("instances_cancelled_total").inc();
        self.set_completion(instance_id, Completion::Cancelled);
        info!(%instance_id, "instance cancelled");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_step::handler_fn;
    use strand_workflow::GraphBuilder;

    fn key(s: &str) -> StepKey {
        StepKey::new(s).unwrap()
    }

    fn wf(s: &str) -> WorkflowKey {
        WorkflowKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn single_step_workflow_completes() {
        let engine = Engine::new(EngineConfig::default());
        engine.register(
            GraphBuilder::new(wf("one"))
                .step(StepNode::new(
                    key("only"),
                    handler_fn(|input, _ctx| async move { Ok(StepResult::finish(input)) }),
                ))
                .build()
                .unwrap(),
        );

        let execution = engine.execute(&wf("one"), json!(5)).await.unwrap();
        assert!(!execution.is_async());
        assert_eq!(execution.result().await.unwrap(), json!(5));

        let status = engine.status(execution.instance_id()).await.unwrap();
        assert_eq!(status.state, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn continue_with_no_edges_is_treated_as_finish() {
        let engine = Engine::new(EngineConfig::default());
        engine.register(
            GraphBuilder::new(wf("implicit"))
                .step(StepNode::new(
                    key("only"),
                    handler_fn(|input, _ctx| async move {
                        Ok(StepResult::continue_with(input))
                    }),
                ))
                .build()
                .unwrap(),
        );

        let execution = engine.execute(&wf("implicit"), json!("done")).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let engine = Engine::new(EngineConfig::default());
        let err = engine.execute(&wf("ghost"), json!(null)).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn handler_error_fails_the_instance() {
        let engine = Engine::new(EngineConfig::default());
        engine.register(
            GraphBuilder::new(wf("failing"))
                .step(StepNode::new(
                    key("boom"),
                    handler_fn(|_input, _ctx| async move {
                        Err::<StepResult, _>(StepError::handler("intentional failure"))
                    }),
                ))
                .build()
                .unwrap(),
        );

        let execution = engine.execute(&wf("failing"), json!(null)).await.unwrap();
        let err = execution.result().await.unwrap_err();
        assert!(matches!(err, EngineError::StepFailed { .. }));

        let status = engine.status(execution.instance_id()).await.unwrap();
        assert_eq!(status.state, InstanceStatus::Failed);
        assert_eq!(status.error.unwrap().code, "handler");
    }

    #[tokio::test]
    async fn branch_without_target_is_a_routing_failure() {
        let engine = Engine::new(EngineConfig::default());
        engine.register(
            GraphBuilder::new(wf("branchy"))
                .step(StepNode::new(
                    key("classify"),
                    handler_fn(|input, _ctx| async move {
                        Ok(StepResult::branch("unmapped", input))
                    }),
                ))
                .build()
                .unwrap(),
        );

        let execution = engine.execute(&wf("branchy"), json!(null)).await.unwrap();
        let err = execution.result().await.unwrap_err();
        match err {
            EngineError::StepFailed { code, .. } => assert_eq!(code, "routing"),
            other => panic!("expected StepFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let engine = Engine::new(EngineConfig::default());
        engine.register(
            GraphBuilder::new(wf("pausing"))
                .step(StepNode::new(
                    key("ask"),
                    handler_fn(|_input, _ctx| async move {
                        Ok(StepResult::suspend(strand_step::SuspendRequest::new(
                            "name?",
                            ValueKind::String,
                        )))
                    }),
                ))
                .build()
                .unwrap(),
        );

        let execution = engine.execute(&wf("pausing"), json!(null)).await.unwrap();
        let id = execution.instance_id();

        assert!(engine.cancel(id).await.unwrap());
        assert!(!engine.cancel(id).await.unwrap());

        let status = engine.status(id).await.unwrap();
        assert_eq!(status.state, InstanceStatus::Cancelled);

        let err = engine.resume(id, json!("Ada")).await.unwrap_err();
        assert!(matches!(err, EngineError::Terminal { .. }));
    }
}
