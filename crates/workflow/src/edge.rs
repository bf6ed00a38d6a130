//! Edges between steps.

use std::sync::Arc;

use serde_json::Value;
use strand_core::StepKey;
use strand_step::StepContext;

/// Predicate deciding whether an edge is taken for a given step output.
///
/// Receives the invocation's context view and the step's output. Edges are
/// evaluated in declaration order; the first accepting edge wins.
pub type EdgePredicate = Arc<dyn Fn(&StepContext, &Value) -> bool + Send + Sync>;

/// A directed edge from one step to another.
#[derive(Clone)]
pub struct Edge {
    /// The step this edge leads to.
    pub target: StepKey,
    predicate: Option<EdgePredicate>,
}

impl Edge {
    /// An unconditional (default) edge.
    pub fn to(target: StepKey) -> Self {
        Self {
            target,
            predicate: None,
        }
    }

    /// A conditional edge.
    pub fn when(
        target: StepKey,
        predicate: impl Fn(&StepContext, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            target,
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Returns `true` if this edge has no predicate.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.predicate.is_none()
    }

    /// Evaluate the edge against a step's output.
    #[must_use]
    pub fn accepts(&self, ctx: &StepContext, output: &Value) -> bool {
        match &self.predicate {
            None => true,
            Some(predicate) => predicate(ctx, output),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("target", &self.target)
            .field("conditional", &!self.is_default())
            .finish()
    }
}
