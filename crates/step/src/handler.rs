//! Handler traits for synchronous and async steps.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::StepContext;
use crate::error::StepError;
use crate::result::StepResult;

/// A step's executable body.
///
/// Handlers are registered on graph nodes at build time; the engine invokes
/// them with the resolved input and a read-consistent [`StepContext`].
/// Errors returned here are converted to [`StepResult::Fail`] at the
/// invocation boundary and fed to the retry policy.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute the step.
    async fn execute(&self, input: Value, ctx: StepContext) -> Result<StepResult, StepError>;
}

/// Progress sink handed to async handlers.
///
/// Object-safe so async handlers can report progress without depending on
/// the engine's tracker implementation.
pub trait ProgressHandle: Send + Sync {
    /// Report progress. `percent` is clamped to `[0, 100]` by the tracker.
    fn report(&self, percent: u8, message: &str);
}

/// What an async handler may return.
///
/// Plain values are normalized by the task manager: `Continue` when the
/// node has outgoing edges, `Finish` otherwise.
#[derive(Debug, Clone)]
pub enum AsyncOutput {
    /// A plain value, normalized by the task manager.
    Value(Value),
    /// An explicit step result, used as-is.
    Step(StepResult),
}

impl From<Value> for AsyncOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<StepResult> for AsyncOutput {
    fn from(result: StepResult) -> Self {
        Self::Step(result)
    }
}

/// The body of an async step, run on the async pool.
#[async_trait]
pub trait AsyncStepHandler: Send + Sync {
    /// Execute the async work, reporting progress along the way.
    async fn execute(
        &self,
        args: Value,
        ctx: StepContext,
        progress: Arc<dyn ProgressHandle>,
    ) -> Result<AsyncOutput, StepError>;
}

/// Adapter turning an async closure into a [`StepHandler`].
///
/// Keeps registration lightweight for inline workflow definitions and
/// tests:
///
/// ```ignore
/// let double = FnHandler::new(|input: Value, _ctx| async move {
///     let n = input.as_i64().ok_or_else(|| StepError::handler("expected number"))?;
///     Ok(StepResult::continue_with(serde_json::json!(n * 2)))
/// });
/// ```
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepResult, StepError>> + Send + 'static,
{
    async fn execute(&self, input: Value, ctx: StepContext) -> Result<StepResult, StepError> {
        (self.f)(input, ctx).await
    }
}

/// Adapter turning an async closure into an [`AsyncStepHandler`].
pub struct AsyncFnHandler<F> {
    f: F,
}

impl<F> AsyncFnHandler<F> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> AsyncStepHandler for AsyncFnHandler<F>
where
    F: Fn(Value, StepContext, Arc<dyn ProgressHandle>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AsyncOutput, StepError>> + Send + 'static,
{
    async fn execute(
        &self,
        args: Value,
        ctx: StepContext,
        progress: Arc<dyn ProgressHandle>,
    ) -> Result<AsyncOutput, StepError> {
        (self.f)(args, ctx, progress).await
    }
}

/// Wrap a closure as a shareable step handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepResult, StepError>> + Send + 'static,
{
    Arc::new(FnHandler::new(f))
}

/// Wrap a closure as a shareable async step handler.
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn AsyncStepHandler>
where
    F: Fn(Value, StepContext, Arc<dyn ProgressHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AsyncOutput, StepError>> + Send + 'static,
{
    Arc::new(AsyncFnHandler::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::{InstanceId, StepKey, WorkflowKey};

    fn test_context() -> StepContext {
        StepContext::new(
            InstanceId::v4(),
            WorkflowKey::new("wf").unwrap(),
            StepKey::new("s").unwrap(),
        )
    }

    struct NoopProgress;
    impl ProgressHandle for NoopProgress {
        fn report(&self, _percent: u8, _message: &str) {}
    }

    #[tokio::test]
    async fn fn_handler_executes_closure() {
        let handler = handler_fn(|input: Value, _ctx| async move {
            let n = input.as_i64().ok_or_else(|| StepError::handler("expected number"))?;
            Ok(StepResult::continue_with(json!(n * 2)))
        });

        let result = handler.execute(json!(3), test_context()).await.unwrap();
        match result {
            StepResult::Continue { data } => assert_eq!(data, json!(6)),
            other => panic!("expected Continue, got {}", other.variant()),
        }
    }

    #[tokio::test]
    async fn fn_handler_propagates_error() {
        let handler = handler_fn(|_input, _ctx| async move {
            Err::<StepResult, _>(StepError::handler("bad input"))
        });

        let err = handler.execute(json!(null), test_context()).await.unwrap_err();
        assert_eq!(err.code(), "handler");
    }

    #[tokio::test]
    async fn async_fn_handler_reports_progress() {
        let handler = async_handler_fn(|args: Value, _ctx, progress| async move {
            progress.report(50, "halfway");
            Ok(AsyncOutput::Value(args))
        });

        let out = handler
            .execute(json!({"n": 1}), test_context(), Arc::new(NoopProgress))
            .await
            .unwrap();
        match out {
            AsyncOutput::Value(v) => assert_eq!(v, json!({"n": 1})),
            AsyncOutput::Step(_) => panic!("expected plain value"),
        }
    }

    #[test]
    fn async_output_from_conversions() {
        let from_value: AsyncOutput = json!(1).into();
        assert!(matches!(from_value, AsyncOutput::Value(_)));

        let from_step: AsyncOutput = StepResult::finish(json!(1)).into();
        assert!(matches!(from_step, AsyncOutput::Step(_)));
    }
}
