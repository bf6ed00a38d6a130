//! Workflow registry.

use std::sync::Arc;

use dashmap::DashMap;
use strand_core::WorkflowKey;
use strand_workflow::WorkflowGraph;

/// In-memory registry mapping workflow ids to compiled graphs.
///
/// Registration replaces any previous graph under the same id; instances
/// already in flight keep the `Arc` of the graph they started with.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<WorkflowKey, Arc<WorkflowGraph>>,
}

impl WorkflowRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph, returning the shared handle.
    pub fn register(&self, graph: WorkflowGraph) -> Arc<WorkflowGraph> {
        let graph = Arc::new(graph);
        self.workflows.insert(graph.id().clone(), graph.clone());
        graph
    }

    /// Look up a graph by workflow id.
    #[must_use]
    pub fn get(&self, workflow_id: &WorkflowKey) -> Option<Arc<WorkflowGraph>> {
        self.workflows.get(workflow_id).map(|e| e.value().clone())
    }

    /// Returns `true` if a graph is registered under the given id.
    #[must_use]
    pub fn contains(&self, workflow_id: &WorkflowKey) -> bool {
        self.workflows.contains_key(workflow_id)
    }

    /// Ids of all registered workflows.
    #[must_use]
    pub fn keys(&self) -> Vec<WorkflowKey> {
        self.workflows.iter().map(|e| e.key().clone()).collect()
    }
}
