//! Fluent builder producing validated, frozen workflow graphs.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use strand_core::{StepKey, WorkflowKey};
use strand_step::StepContext;
use tracing::warn;

use crate::edge::Edge;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::StepNode;

/// Builds a [`WorkflowGraph`].
///
/// Collects steps, edges and branch targets, then validates the whole
/// graph once in [`build`](Self::build). Validation failures are hard
/// errors; a cycle only warns, because loop-shaped workflows are legal as
/// long as every loop eventually suspends, yields async work, or finishes.
pub struct GraphBuilder {
    id: WorkflowKey,
    version: u32,
    nodes: Vec<StepNode>,
    initial: Option<StepKey>,
    edges: Vec<(StepKey, Edge)>,
    branch_targets: Vec<(String, StepKey)>,
}

impl GraphBuilder {
    /// Start building a graph for the given workflow id.
    #[must_use]
    pub fn new(id: WorkflowKey) -> Self {
        Self {
            id,
            version: 1,
            nodes: Vec::new(),
            initial: None,
            edges: Vec::new(),
            branch_targets: Vec::new(),
        }
    }

    /// Set the graph version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Add a step node. The first added step becomes the initial step
    /// unless [`initial`](Self::initial) overrides it.
    #[must_use]
    pub fn step(mut self, node: StepNode) -> Self {
        if self.initial.is_none() {
            self.initial = Some(node.id.clone());
        }
        self.nodes.push(node);
        self
    }

    /// Declare the initial step.
    #[must_use]
    pub fn initial(mut self, step: StepKey) -> Self {
        self.initial = Some(step);
        self
    }

    /// Add an unconditional edge.
    #[must_use]
    pub fn edge(mut self, from: StepKey, to: StepKey) -> Self {
        self.edges.push((from, Edge::to(to)));
        self
    }

    /// Add a conditional edge.
    #[must_use]
    pub fn edge_when(
        mut self,
        from: StepKey,
        to: StepKey,
        predicate: impl Fn(&StepContext, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.edges.push((from, Edge::when(to, predicate)));
        self
    }

    /// Map an event type to its branch target step.
    #[must_use]
    pub fn branch_target(mut self, event_type: impl Into<String>, target: StepKey) -> Self {
        self.branch_targets.push((event_type.into(), target));
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        let mut nodes: HashMap<StepKey, StepNode> = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateStep(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }

        let initial = self.initial.ok_or(GraphError::MissingInitialStep)?;
        if !nodes.contains_key(&initial) {
            return Err(GraphError::UnknownStep {
                step: initial,
                referenced_by: "initial step".into(),
            });
        }

        let mut edges: HashMap<StepKey, Vec<Edge>> = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(GraphError::UnknownStep {
                    step: from,
                    referenced_by: format!("edge to '{}'", edge.target),
                });
            }
            if !nodes.contains_key(&edge.target) {
                return Err(GraphError::UnknownStep {
                    step: edge.target,
                    referenced_by: format!("edge from '{from}'"),
                });
            }
            edges.entry(from).or_default().push(edge);
        }

        // A default edge matches everything, so edges after it are dead.
        for (from, list) in &edges {
            if let Some(default_pos) = list.iter().position(Edge::is_default) {
                if default_pos != list.len() - 1 {
                    return Err(GraphError::DefaultEdgeNotLast { step: from.clone() });
                }
            }
        }

        let mut branch_targets = HashMap::with_capacity(self.branch_targets.len());
        for (event_type, target) in self.branch_targets {
            if !nodes.contains_key(&target) {
                return Err(GraphError::UnknownStep {
                    step: target,
                    referenced_by: format!("branch target '{event_type}'"),
                });
            }
            branch_targets.insert(event_type, target);
        }

        validate_reachability(&nodes, &initial, &edges, &branch_targets)?;

        if has_cycle(&nodes, &edges) {
            warn!(
                workflow = %self.id,
                "workflow graph contains a cycle; every loop must suspend, \
                 yield async work, or finish"
            );
        }

        Ok(WorkflowGraph {
            id: self.id,
            version: self.version,
            nodes,
            initial_step: initial,
            edges,
            branch_targets,
        })
    }
}

/// Every node must be reachable from the initial step via edges, or be the
/// target of a branch mapping (branch routing is dynamic, so targets count
/// as roots).
fn validate_reachability(
    nodes: &HashMap<StepKey, StepNode>,
    initial: &StepKey,
    edges: &HashMap<StepKey, Vec<Edge>>,
    branch_targets: &HashMap<String, StepKey>,
) -> Result<(), GraphError> {
    let mut visited: HashSet<StepKey> = HashSet::new();
    let mut queue: VecDeque<StepKey> = VecDeque::new();

    queue.push_back(initial.clone());
    for target in branch_targets.values() {
        queue.push_back(target.clone());
    }

    while let Some(step) = queue.pop_front() {
        if !visited.insert(step.clone()) {
            continue;
        }
        if let Some(list) = edges.get(&step) {
            for edge in list {
                queue.push_back(edge.target.clone());
            }
        }
    }

    for step in nodes.keys() {
        if !visited.contains(step) {
            return Err(GraphError::UnreachableStep(step.clone()));
        }
    }
    Ok(())
}

/// Detect a cycle over the static edge relation (branch targets excluded —
/// branch routing is data-dependent).
fn has_cycle(nodes: &HashMap<StepKey, StepNode>, edges: &HashMap<StepKey, Vec<Edge>>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        step: &StepKey,
        edges: &HashMap<StepKey, Vec<Edge>>,
        marks: &mut HashMap<StepKey, Mark>,
    ) -> bool {
        match marks.get(step).copied().unwrap_or(Mark::Unvisited) {
            Mark::InProgress => return true,
            Mark::Done => return false,
            Mark::Unvisited => {}
        }
        marks.insert(step.clone(), Mark::InProgress);
        if let Some(list) = edges.get(step) {
            for edge in list {
                if visit(&edge.target, edges, marks) {
                    return true;
                }
            }
        }
        marks.insert(step.clone(), Mark::Done);
        false
    }

    let mut marks = HashMap::new();
    nodes.keys().any(|step| visit(step, edges, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_step::{StepResult, handler_fn};

    fn echo() -> std::sync::Arc<dyn strand_step::StepHandler> {
        handler_fn(|input, _ctx| async move { Ok(StepResult::continue_with(input)) })
    }

    fn key(s: &str) -> StepKey {
        StepKey::new(s).unwrap()
    }

    fn node(s: &str) -> StepNode {
        StepNode::new(key(s), echo())
    }

    #[test]
    fn linear_graph_builds() {
        let graph = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("b"))
            .edge(key("a"), key("b"))
            .build()
            .unwrap();

        assert_eq!(graph.step_count(), 2);
        assert_eq!(graph.initial_step(), &key("a"));
        assert_eq!(graph.version(), 1);
    }

    #[test]
    fn first_step_is_default_initial() {
        let graph = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("first"))
            .step(node("second"))
            .edge(key("first"), key("second"))
            .build()
            .unwrap();
        assert_eq!(graph.initial_step(), &key("first"));
    }

    #[test]
    fn duplicate_step_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStep(_)));
    }

    #[test]
    fn missing_initial_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingInitialStep));
    }

    #[test]
    fn unknown_initial_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .initial(key("ghost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownStep { .. }));
    }

    #[test]
    fn edge_to_unknown_step_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .edge(key("a"), key("ghost"))
            .build()
            .unwrap_err();
        match err {
            GraphError::UnknownStep { step, .. } => assert_eq!(step, key("ghost")),
            other => panic!("expected UnknownStep, got {other}"),
        }
    }

    #[test]
    fn branch_target_to_unknown_step_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .branch_target("spam", key("ghost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownStep { .. }));
    }

    #[test]
    fn default_edge_must_be_last() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("b"))
            .step(node("c"))
            .edge(key("a"), key("b"))
            .edge_when(key("a"), key("c"), |_ctx, out| out.is_string())
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DefaultEdgeNotLast { .. }));
    }

    #[test]
    fn conditional_then_default_edge_is_accepted() {
        let graph = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("b"))
            .step(node("c"))
            .edge_when(key("a"), key("b"), |_ctx, out| out.is_string())
            .edge(key("a"), key("c"))
            .build()
            .unwrap();
        assert_eq!(graph.outgoing_edges(&key("a")).len(), 2);
    }

    #[test]
    fn unreachable_step_rejected() {
        let err = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("island"))
            .build()
            .unwrap_err();
        match err {
            GraphError::UnreachableStep(step) => assert_eq!(step, key("island")),
            other => panic!("expected UnreachableStep, got {other}"),
        }
    }

    #[test]
    fn branch_target_counts_as_reachable() {
        let graph = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("classify"))
            .step(node("quarantine"))
            .branch_target("spam", key("quarantine"))
            .build()
            .unwrap();
        assert!(graph.contains(&key("quarantine")));
    }

    #[test]
    fn cycle_is_allowed() {
        // Loop-agent shape: a → b → a. Build succeeds (with a warning).
        let graph = GraphBuilder::new(WorkflowKey::new("wf").unwrap())
            .step(node("a"))
            .step(node("b"))
            .edge(key("a"), key("b"))
            .edge(key("b"), key("a"))
            .build()
            .unwrap();
        assert_eq!(graph.step_count(), 2);
    }
}
