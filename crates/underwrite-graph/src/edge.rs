use std::collections::HashMap;

use underwrite_core::types::EvaluationRecord;

/// Predicate over the record, evaluated once the source node completes.
pub type BranchPredicate = fn(&EvaluationRecord) -> bool;

/// An edge followed only when its predicate holds.
#[derive(Clone)]
pub struct ConditionalEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Name of the condition, shown in graph renderings and logs.
    pub tag: &'static str,
    pub predicate: BranchPredicate,
}

impl ConditionalEdge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        tag: &'static str,
        predicate: BranchPredicate,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            tag,
            predicate,
        }
    }

    pub fn holds(&self, record: &EvaluationRecord) -> bool {
        (self.predicate)(record)
    }
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Conditional edges, keyed by source node id.
///
/// Edges sharing a source are alternatives: each is evaluated against the
/// record once the source completes.
#[derive(Debug, Clone, Default)]
pub struct BranchTable {
    edges: HashMap<String, Vec<ConditionalEdge>>,
}

impl BranchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_edge(mut self, edge: ConditionalEdge) -> Self {
        self.add(edge);
        self
    }

    pub fn add(&mut self, edge: ConditionalEdge) {
        self.edges.entry(edge.from.clone()).or_default().push(edge);
    }

    /// Conditional edges leaving `from`.
    pub fn outgoing(&self, from: &str) -> &[ConditionalEdge] {
        self.edges.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every conditional edge.
    pub fn iter(&self) -> impl Iterator<Item = &ConditionalEdge> {
        self.edges.values().flatten()
    }

    /// The conditional edge entering `to`, if any.
    pub fn incoming(&self, to: &str) -> Option<&ConditionalEdge> {
        self.iter().find(|e| e.to == to)
    }

    /// Split the targets of `from` into (selected, rejected).
    pub fn select(&self, from: &str, record: &EvaluationRecord) -> (Vec<&str>, Vec<&str>) {
        let mut selected = vec![];
        let mut rejected = vec![];
        for edge in self.outgoing(from) {
            if edge.holds(record) {
                selected.push(edge.to.as_str());
            } else {
                rejected.push(edge.to.as_str());
            }
        }
        (selected, rejected)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
