use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use underwrite_core::error::{Result, UnderwriteError};

use crate::edge::BranchTable;
use crate::node::TaskNode;

/// A validated workflow: task nodes, their unconditional dependencies, and
/// the conditional edges between them.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
    branches: BranchTable,
    dependents: HashMap<String, Vec<String>>,
    order: Vec<String>,
    optional: BTreeSet<String>,
}

impl WorkflowGraph {
    /// Build and validate a graph.
    ///
    /// Rejects duplicate ids, unknown dependency or branch endpoints, nodes
    /// entered by more than one conditional edge, cycles, and record fields
    /// claimed by more than one node.
    pub fn new(nodes: Vec<TaskNode>, branches: BranchTable) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(UnderwriteError::Graph(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut writers = HashMap::new();
        for node in &nodes {
            for dep in &node.depends_on {
                if !index.contains_key(dep) {
                    return Err(UnderwriteError::Graph(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.id, dep
                    )));
                }
            }
            for field in &node.writes {
                if let Some(other) = writers.insert(*field, node.id.as_str()) {
                    return Err(UnderwriteError::Graph(format!(
                        "field '{}' is written by both '{}' and '{}'",
                        field, other, node.id
                    )));
                }
            }
        }

        let mut entered = HashSet::new();
        for edge in branches.iter() {
            for endpoint in [&edge.from, &edge.to] {
                if !index.contains_key(endpoint) {
                    return Err(UnderwriteError::Graph(format!(
                        "conditional edge '{}' references unknown node '{}'",
                        edge.tag, endpoint
                    )));
                }
            }
            if !entered.insert(edge.to.as_str()) {
                return Err(UnderwriteError::Graph(format!(
                    "node '{}' is the target of more than one conditional edge",
                    edge.to
                )));
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &nodes {
            for dep in &node.depends_on {
                dependents.entry(dep.clone()).or_default().push(node.id.clone());
            }
        }

        let order = topological_order(&nodes, &index, &branches)?;
        let optional = optional_nodes(&nodes, &branches, &dependents);

        Ok(Self {
            nodes,
            index,
            branches,
            dependents,
            order,
            optional,
        })
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn branches(&self) -> &BranchTable {
        &self.branches
    }

    /// Node ids in a dependency-respecting order.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes that unconditionally depend on `id`.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every node reachable from `id`, over both kinds of edge.
    pub fn downstream(&self, id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        let mut out = vec![];
        while let Some(current) = queue.pop_front() {
            let next = self
                .dependents(&current)
                .iter()
                .cloned()
                .chain(self.branches.outgoing(&current).iter().map(|e| e.to.clone()));
            for n in next {
                if seen.insert(n.clone()) {
                    out.push(n.clone());
                    queue.push_back(n);
                }
            }
        }
        out
    }

    /// Whether every path from a root to `id` crosses a conditional edge.
    ///
    /// A failure on an optional node fails only its own branch.
    pub fn is_optional(&self, id: &str) -> bool {
        self.optional.contains(id)
    }

    pub fn optional_nodes(&self) -> &BTreeSet<String> {
        &self.optional
    }

    /// Plain-text table of the workflow.
    pub fn table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<18} {:<32} {:<28} {:<40} writes",
            "id", "name", "capability", "depends on"
        );
        for id in &self.order {
            let Some(node) = self.node(id) else { continue };
            let mut deps = node.depends_on.join(", ");
            if let Some(edge) = self.branches.incoming(&node.id) {
                if !deps.is_empty() {
                    deps.push_str(", ");
                }
                let _ = write!(deps, "{} [{}]", edge.from, edge.tag);
            }
            if deps.is_empty() {
                deps.push('-');
            }
            let writes: Vec<&str> = node.writes.iter().map(|f| f.as_str()).collect();
            let _ = writeln!(
                out,
                "{:<18} {:<32} {:<28} {:<40} {}",
                node.id,
                node.name,
                node.capability,
                deps,
                writes.join(", ")
            );
        }
        out
    }

    /// Graphviz DOT rendering. Conditional edges are dashed and labelled.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph workflow {\n    rankdir=TB;\n    node [shape=box];\n");
        for id in &self.order {
            if let Some(node) = self.node(id) {
                let style = if self.is_optional(id) { ", style=dashed" } else { "" };
                let _ = writeln!(
                    out,
                    "    \"{}\" [label=\"{}\\n{}\"{}];",
                    node.id, node.name, node.capability, style
                );
            }
        }
        for id in &self.order {
            let Some(node) = self.node(id) else { continue };
            for dep in &node.depends_on {
                let _ = writeln!(out, "    \"{}\" -> \"{}\";", dep, node.id);
            }
            if let Some(edge) = self.branches.incoming(&node.id) {
                let _ = writeln!(
                    out,
                    "    \"{}\" -> \"{}\" [style=dashed, label=\"{}\"];",
                    edge.from, edge.to, edge.tag
                );
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Kahn's algorithm over both kinds of edge; ties keep declaration order.
fn topological_order(
    nodes: &[TaskNode],
    index: &HashMap<String, usize>,
    branches: &BranchTable,
) -> Result<Vec<String>> {
    let mut indegree = vec![0usize; nodes.len()];
    let mut successors: Vec<Vec<usize>> = vec![vec![]; nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.depends_on {
            successors[index[dep]].push(i);
            indegree[i] += 1;
        }
    }
    for edge in branches.iter() {
        successors[index[&edge.from]].push(index[&edge.to]);
        indegree[index[&edge.to]] += 1;
    }
    for list in &mut successors {
        list.sort_unstable();
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = queue.pop_front() {
        order.push(nodes[i].id.clone());
        for &next in &successors[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| nodes[i].id.as_str())
            .collect();
        return Err(UnderwriteError::Graph(format!(
            "cycle detected among: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// Nodes not reachable from a root over unconditional edges alone.
fn optional_nodes(
    nodes: &[TaskNode],
    branches: &BranchTable,
    dependents: &HashMap<String, Vec<String>>,
) -> BTreeSet<String> {
    let mut required: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|n| n.depends_on.is_empty() && branches.incoming(&n.id).is_none())
        .map(|n| n.id.as_str())
        .collect();

    while let Some(id) = queue.pop_front() {
        if !required.insert(id) {
            continue;
        }
        for dependent in dependents.get(id).into_iter().flatten() {
            queue.push_back(dependent.as_str());
        }
    }

    nodes
        .iter()
        .filter(|n| !required.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}
