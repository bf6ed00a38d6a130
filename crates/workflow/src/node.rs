//! Step node definitions.

use std::sync::Arc;

use strand_core::StepKey;
use strand_resilience::{CircuitBreakerConfig, RetryPolicy};
use strand_step::{AsyncStepHandler, StepHandler, ValueKind};

/// A node in a workflow graph.
///
/// Carries the step's handler, declared input/output kinds, and optional
/// per-step failure policies. Nodes are immutable once the graph is built.
#[derive(Clone)]
pub struct StepNode {
    /// The step's id, unique within the graph.
    pub id: StepKey,
    /// Human-readable name (defaults to the id).
    pub name: String,
    /// The step's executable body.
    pub handler: Arc<dyn StepHandler>,
    /// Body run on the async pool when the step hands off async work.
    pub async_handler: Option<Arc<dyn AsyncStepHandler>>,
    /// Declared input kind.
    pub input_kind: ValueKind,
    /// Declared output kind.
    pub output_kind: ValueKind,
    /// Per-step retry policy; the engine falls back to no retries.
    pub retry_policy: Option<RetryPolicy>,
    /// Per-step circuit breaker configuration.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl StepNode {
    /// Create a node with the given id and handler.
    ///
    /// Input and output kinds default to [`ValueKind::Any`].
    pub fn new(id: StepKey, handler: Arc<dyn StepHandler>) -> Self {
        let name = id.to_string();
        Self {
            id,
            name,
            handler,
            async_handler: None,
            input_kind: ValueKind::Any,
            output_kind: ValueKind::Any,
            retry_policy: None,
            circuit_breaker: None,
        }
    }

    /// Set a human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach an async body, making the step async-capable.
    #[must_use]
    pub fn with_async_handler(mut self, handler: Arc<dyn AsyncStepHandler>) -> Self {
        self.async_handler = Some(handler);
        self
    }

    /// Declare the input kind.
    #[must_use]
    pub fn with_input_kind(mut self, kind: ValueKind) -> Self {
        self.input_kind = kind;
        self
    }

    /// Declare the output kind.
    #[must_use]
    pub fn with_output_kind(mut self, kind: ValueKind) -> Self {
        self.output_kind = kind;
        self
    }

    /// Attach a retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Attach a circuit breaker.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Returns `true` if the node can run work on the async pool.
    #[must_use]
    pub fn is_async_capable(&self) -> bool {
        self.async_handler.is_some()
    }
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("input_kind", &self.input_kind)
            .field("output_kind", &self.output_kind)
            .field("async_capable", &self.is_async_capable())
            .finish_non_exhaustive()
    }
}
