use serde::Serialize;

use underwrite_core::types::RecordField;

/// A node in the workflow graph: one capability call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    /// Unique identifier for this node.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Capability invoked when the node runs.
    pub capability: String,
    /// Nodes that must complete before this one is ready.
    pub depends_on: Vec<String>,
    /// Record fields this node is allowed to write.
    pub writes: Vec<RecordField>,
}

impl TaskNode {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability: capability.into(),
            depends_on: vec![],
            writes: vec![],
        }
    }

    /// Set the dependencies.
    pub fn with_dependencies(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the fields this node writes.
    pub fn with_writes(mut self, fields: &[RecordField]) -> Self {
        self.writes = fields.to_vec();
        self
    }
}
