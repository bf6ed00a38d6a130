//! Immutable workflow graphs.

use std::collections::HashMap;

use strand_core::{StepKey, WorkflowKey};

use crate::edge::Edge;
use crate::node::StepNode;

/// A compiled, immutable workflow graph.
///
/// Built once via [`GraphBuilder`](crate::builder::GraphBuilder) and shared
/// behind an `Arc`. The graph never changes after `build()`; per-run state
/// lives entirely in the instance.
pub struct WorkflowGraph {
    pub(crate) id: WorkflowKey,
    pub(crate) version: u32,
    pub(crate) nodes: HashMap<StepKey, StepNode>,
    pub(crate) initial_step: StepKey,
    pub(crate) edges: HashMap<StepKey, Vec<Edge>>,
    pub(crate) branch_targets: HashMap<String, StepKey>,
}

impl WorkflowGraph {
    /// The workflow's id.
    #[must_use]
    pub fn id(&self) -> &WorkflowKey {
        &self.id
    }

    /// The graph's version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Look up a node by step id.
    #[must_use]
    pub fn node(&self, step: &StepKey) -> Option<&StepNode> {
        self.nodes.get(step)
    }

    /// Returns `true` if the graph contains the given step.
    #[must_use]
    pub fn contains(&self, step: &StepKey) -> bool {
        self.nodes.contains_key(step)
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.nodes.len()
    }

    /// The step every run starts at.
    #[must_use]
    pub fn initial_step(&self) -> &StepKey {
        &self.initial_step
    }

    /// Ordered outgoing edges for a step (empty for terminal-capable nodes).
    #[must_use]
    pub fn outgoing_edges(&self, step: &StepKey) -> &[Edge] {
        self.edges.get(step).map_or(&[], Vec::as_slice)
    }

    /// The target step for an event type, if mapped.
    #[must_use]
    pub fn branch_target(&self, event_type: &str) -> Option<&StepKey> {
        self.branch_targets.get(event_type)
    }

    /// Returns `true` if a `Continue` from this step finishes the run
    /// (the node has no outgoing edges).
    #[must_use]
    pub fn is_terminal_capable(&self, step: &StepKey) -> bool {
        self.outgoing_edges(step).is_empty()
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("steps", &self.nodes.len())
            .field("initial_step", &self.initial_step)
            .field("branch_targets", &self.branch_targets.len())
            .finish()
    }
}
