pub mod adapter;
pub mod context;
pub mod edge;
pub mod executor;
pub mod graph;
pub mod node;
pub mod pipeline;
pub mod retry;

pub use adapter::{NodeAdapter, NodeOutputs, PreparedCall};
pub use context::{ExecutionContext, NodeStatus};
pub use edge::{BranchPredicate, BranchTable, ConditionalEdge};
pub use executor::{GraphExecutor, NodeError, NodeResult, RunOutcome, RunReport};
pub use graph::WorkflowGraph;
pub use node::TaskNode;
pub use pipeline::{credit_underwriting_graph, offer_if_approved};
pub use retry::{BackoffRetry, NoRetry, RetryPolicy};
