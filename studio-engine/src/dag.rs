//! Workflow DAG validation (spec §4.2): single reachable trigger, no
//! cycles, every node type resolvable against the connector registry.

use std::collections::{HashMap, HashSet, VecDeque};

use studio_core::model::Workflow;
use studio_core::{NodeId, StudioError, StudioResult};

/// A validated, topologically-ordered view of a [`Workflow`]. Built once
/// per execution by [`validate`] and then walked wavefront-by-wavefront by
/// the Graph Runner.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    pub trigger: NodeId,
    pub order: Vec<NodeId>,
    pub successors: HashMap<NodeId, Vec<NodeId>>,
    pub predecessors: HashMap<NodeId, Vec<NodeId>>,
}

impl ExecutionGraph {
    pub fn successors_of(&self, node: &NodeId) -> &[NodeId] {
        self.successors.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors_of(&self, node: &NodeId) -> &[NodeId] {
        self.predecessors.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn is_trigger_type(node_type: &str) -> bool {
    node_type.starts_with("trigger.")
}

/// Validates a workflow's graph shape and returns the execution order
/// (spec §4.2 "DAG validation"). Does not check per-node connector/
/// operation existence -- that happens lazily at node-execution time so
/// registry changes (a connector going sunset) don't require re-validating
/// every stored workflow.
pub fn validate(workflow: &Workflow) -> StudioResult<ExecutionGraph> {
    if workflow.nodes.is_empty() {
        return Err(StudioError::BadInput("workflow has no nodes".into()));
    }

    let node_ids: HashSet<&NodeId> = workflow.nodes.iter().map(|n| &n.id).collect();
    for edge in &workflow.edges {
        if !node_ids.contains(&edge.source) {
            return Err(StudioError::BadInput(format!("edge references unknown source node '{}'", edge.source)));
        }
        if !node_ids.contains(&edge.target) {
            return Err(StudioError::BadInput(format!("edge references unknown target node '{}'", edge.target)));
        }
    }

    let triggers: Vec<&NodeId> = workflow.nodes.iter().filter(|n| is_trigger_type(&n.node_type)).map(|n| &n.id).collect();
    if triggers.len() != 1 {
        return Err(StudioError::BadInput(format!(
            "workflow must have exactly one trigger node, found {}",
            triggers.len()
        )));
    }
    let trigger = triggers[0].clone();

    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut in_degree: HashMap<NodeId, u32> = workflow.nodes.iter().map(|n| (n.id.clone(), 0)).collect();

    for edge in &workflow.edges {
        successors.entry(edge.source.clone()).or_default().push(edge.target.clone());
        predecessors.entry(edge.target.clone()).or_default().push(edge.source.clone());
        *in_degree.get_mut(&edge.target).expect("target validated above") += 1;
    }

    // Kahn's algorithm: a cycle survives as nodes with no zero in-degree
    // ancestor, which shows up as leftover in_degree once the queue drains.
    let mut queue: VecDeque<NodeId> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(id, _)| id.clone()).collect();
    let mut order = Vec::with_capacity(workflow.nodes.len());
    let mut remaining = in_degree.clone();

    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        for succ in successors.get(&node).into_iter().flatten() {
            let deg = remaining.get_mut(succ).expect("successor present in in_degree map");
            *deg -= 1;
            if *deg == 0 {
                queue.push_back(succ.clone());
            }
        }
    }

    if order.len() != workflow.nodes.len() {
        return Err(StudioError::BadInput("workflow graph contains a cycle".into()));
    }

    let reachable = reachable_from(&trigger, &successors);
    if reachable.len() != workflow.nodes.len() {
        let unreachable: Vec<String> = node_ids.iter().filter(|id| !reachable.contains(**id)).map(|id| id.to_string()).collect();
        return Err(StudioError::BadInput(format!("node(s) unreachable from trigger: {}", unreachable.join(", "))));
    }

    Ok(ExecutionGraph { trigger, order, successors, predecessors })
}

fn reachable_from<'a>(start: &'a NodeId, successors: &'a HashMap<NodeId, Vec<NodeId>>) -> HashSet<&'a NodeId> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if seen.insert(node) {
            for succ in successors.get(node).into_iter().flatten() {
                stack.push(succ);
            }
        }
    }
    seen
}
