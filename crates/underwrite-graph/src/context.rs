use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use underwrite_core::types::{EvaluationRecord, RunId};

use crate::graph::WorkflowGraph;

/// Lifecycle state of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// Mutable state of one run: the record and per-node progress.
///
/// Owned by the executor loop; nothing else writes to it.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub record: EvaluationRecord,
    status: HashMap<String, NodeStatus>,
    /// Unmet gates per node: one per dependency, plus one for an incoming
    /// conditional edge.
    pending: HashMap<String, usize>,
}

impl ExecutionContext {
    pub fn new(run_id: RunId, record: EvaluationRecord, graph: &WorkflowGraph) -> Self {
        let mut status = HashMap::new();
        let mut pending = HashMap::new();
        for node in graph.nodes() {
            let gates = node.depends_on.len() + usize::from(graph.branches().incoming(&node.id).is_some());
            let initial = if gates == 0 {
                NodeStatus::Ready
            } else {
                NodeStatus::Pending
            };
            status.insert(node.id.clone(), initial);
            pending.insert(node.id.clone(), gates);
        }
        Self {
            run_id,
            record,
            status,
            pending,
        }
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.status.get(id).copied()
    }

    pub fn set_status(&mut self, id: &str, status: NodeStatus) {
        if let Some(s) = self.status.get_mut(id) {
            *s = status;
        }
    }

    /// Clear one gate of a pending node. Returns true if it became ready.
    pub fn release(&mut self, id: &str) -> bool {
        if self.status(id) != Some(NodeStatus::Pending) {
            return false;
        }
        let Some(gates) = self.pending.get_mut(id) else {
            return false;
        };
        *gates = gates.saturating_sub(1);
        if *gates == 0 {
            self.set_status(id, NodeStatus::Ready);
            true
        } else {
            false
        }
    }

    /// Ready nodes, in the graph's topological order.
    pub fn ready(&self, graph: &WorkflowGraph) -> Vec<String> {
        graph
            .topological_order()
            .iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Ready))
            .cloned()
            .collect()
    }

    /// Mark `id` and everything downstream of it Skipped, leaving nodes that
    /// already reached a terminal state or are running untouched. Returns the
    /// ids newly skipped.
    pub fn skip_from(&mut self, graph: &WorkflowGraph, id: &str) -> Vec<String> {
        let mut skipped = vec![];
        let targets = std::iter::once(id.to_string()).chain(graph.downstream(id));
        for target in targets {
            if matches!(
                self.status(&target),
                Some(NodeStatus::Pending | NodeStatus::Ready)
            ) {
                self.set_status(&target, NodeStatus::Skipped);
                skipped.push(target);
            }
        }
        skipped
    }

    /// Skip every node still pending or ready. Returns the ids skipped.
    pub fn skip_remaining(&mut self, graph: &WorkflowGraph) -> Vec<String> {
        let mut skipped = vec![];
        for id in graph.topological_order() {
            if matches!(self.status(id), Some(NodeStatus::Pending | NodeStatus::Ready)) {
                self.set_status(id, NodeStatus::Skipped);
                skipped.push(id.clone());
            }
        }
        skipped
    }

    /// Ids of nodes currently running, in topological order.
    pub fn running(&self, graph: &WorkflowGraph) -> Vec<String> {
        graph
            .topological_order()
            .iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Running))
            .cloned()
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.status.values().all(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{BranchTable, ConditionalEdge};
    use crate::node::TaskNode;
    use underwrite_test_utils::sample_record;

    fn never(_: &EvaluationRecord) -> bool {
        false
    }

    fn graph() -> WorkflowGraph {
        let nodes = vec![
            TaskNode::new("a", "A", "cap_a"),
            TaskNode::new("b", "B", "cap_b").with_dependencies(&["a"]),
            TaskNode::new("c", "C", "cap_c").with_dependencies(&["a"]),
            TaskNode::new("d", "D", "cap_d").with_dependencies(&["b", "c"]),
            TaskNode::new("e", "E", "cap_e"),
        ];
        let branches = BranchTable::new().with_edge(ConditionalEdge::new("d", "e", "never", never));
        WorkflowGraph::new(nodes, branches).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let graph = graph();
        let ctx = ExecutionContext::new(RunId::new(), sample_record(), &graph);
        assert_eq!(ctx.status("a"), Some(NodeStatus::Ready));
        assert_eq!(ctx.status("d"), Some(NodeStatus::Pending));
        // Entered only through a conditional edge.
        assert_eq!(ctx.status("e"), Some(NodeStatus::Pending));
        assert_eq!(ctx.ready(&graph), vec!["a"]);
    }

    #[test]
    fn test_release_requires_every_gate() {
        let graph = graph();
        let mut ctx = ExecutionContext::new(RunId::new(), sample_record(), &graph);
        assert!(!ctx.release("d"));
        assert!(ctx.release("d"));
        assert_eq!(ctx.status("d"), Some(NodeStatus::Ready));
        // Not pending any more.
        assert!(!ctx.release("d"));
    }

    #[test]
    fn test_skip_from_spares_running_and_finished() {
        let graph = graph();
        let mut ctx = ExecutionContext::new(RunId::new(), sample_record(), &graph);
        ctx.set_status("a", NodeStatus::Completed);
        ctx.set_status("c", NodeStatus::Running);

        let skipped = ctx.skip_from(&graph, "b");
        assert_eq!(skipped, vec!["b", "d", "e"]);
        assert_eq!(ctx.status("c"), Some(NodeStatus::Running));
        assert!(!ctx.is_finished());

        ctx.set_status("c", NodeStatus::Completed);
        assert!(ctx.is_finished());
    }
}
