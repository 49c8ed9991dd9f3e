use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use underwrite_core::config::ExecutorConfig;
use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::event::{EventBus, RunEvent};
use underwrite_core::traits::CapabilityClient;
use underwrite_core::types::{ApplicantProfile, EvaluationRecord, RunId};

use crate::adapter::{NodeAdapter, NodeOutputs};
use crate::context::{ExecutionContext, NodeStatus};
use crate::graph::WorkflowGraph;
use crate::retry::{BackoffRetry, NoRetry, RetryPolicy};

/// Why a node failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeError {
    pub kind: String,
    pub message: String,
}

impl From<&UnderwriteError> for NodeError {
    fn from(e: &UnderwriteError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Final state of a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    /// Time from launch to completion or failure. Absent for nodes that never ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every required node completed. Optional nodes listed here failed.
    Completed { optional_failures: Vec<String> },
    /// A required node failed, so no decision could be reached.
    Failed {
        node: String,
        kind: String,
        message: String,
    },
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// The record as it stood when the run ended.
    pub record: EvaluationRecord,
    /// Per-node results, in graph declaration order.
    pub nodes: Vec<NodeResult>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn node(&self, id: &str) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }
}

/// A finished call, as seen by the executor loop.
struct Completion {
    node_id: String,
    result: Result<NodeOutputs>,
    elapsed_ms: u64,
}

/// Runs a workflow graph for one applicant at a time.
///
/// Every ready node is launched at once and awaited through a
/// `FuturesUnordered`. Completions are merged into the record one at a time
/// by the loop that owns it, which then releases dependents and evaluates
/// conditional edges leaving the completed node.
pub struct GraphExecutor {
    graph: WorkflowGraph,
    config: ExecutorConfig,
    retry: Arc<dyn RetryPolicy>,
    events: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            config: ExecutorConfig::default(),
            retry: Arc::new(NoRetry),
            events: None,
        }
    }

    /// Apply timeouts, the run deadline and the retry section.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.retry = match &config.retry {
            Some(retry) => Arc::new(BackoffRetry::new(retry.clone())),
            None => Arc::new(NoRetry),
        };
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Publish run progress on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Resolve every node's capability before anything runs.
    fn adapters(&self, client: &dyn CapabilityClient) -> Result<HashMap<String, NodeAdapter>> {
        let mut adapters = HashMap::new();
        for node in self.graph.nodes() {
            let schema = client
                .schema(&node.capability)
                .ok_or_else(|| UnderwriteError::UnknownCapability(node.capability.clone()))?;
            let adapter = NodeAdapter::new(node.clone(), schema)?
                .with_timeout(self.config.call_timeout(&node.capability))
                .with_retry(self.retry.clone());
            adapters.insert(node.id.clone(), adapter);
        }
        Ok(adapters)
    }

    /// Run the graph for `applicant`.
    ///
    /// Returns `Err` only when the run cannot start: an invalid applicant or
    /// a capability nobody serves. Node failures are reported in the
    /// returned report.
    pub async fn run(
        &self,
        client: &dyn CapabilityClient,
        applicant: ApplicantProfile,
    ) -> Result<RunReport> {
        applicant.validate()?;
        let adapters = self.adapters(client)?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = self
            .config
            .run_deadline()
            .map(|d| (tokio::time::Instant::now() + d, d));

        info!(
            run_id = %run_id,
            applicant = %applicant.name,
            nodes = self.graph.nodes().len(),
            "Run started"
        );
        self.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let ctx = ExecutionContext::new(run_id.clone(), EvaluationRecord::new(applicant), &self.graph);
        let mut run = RunState::new(self, ctx);
        let mut in_flight: FuturesUnordered<BoxFuture<'_, Completion>> = FuturesUnordered::new();

        run.launch_ready(&adapters, client, &mut in_flight);

        let mut deadline_hit = None;
        while !in_flight.is_empty() {
            let next = match deadline {
                Some((at, limit)) => tokio::select! {
                    completion = in_flight.next() => completion,
                    _ = tokio::time::sleep_until(at) => {
                        deadline_hit = Some(limit);
                        break;
                    }
                },
                None => in_flight.next().await,
            };
            let Some(completion) = next else { break };

            run.settle(completion);
            if run.failure.is_none() {
                run.launch_ready(&adapters, client, &mut in_flight);
            }
        }
        // Abandon whatever is still in flight.
        drop(in_flight);

        if let Some(limit) = deadline_hit {
            run.expire(limit.as_millis() as u64);
        }

        Ok(run.finish(started_at, start))
    }
}

struct RunFailure {
    node: String,
    error: NodeError,
}

/// Bookkeeping for one run, owned by the executor loop.
struct RunState<'a> {
    executor: &'a GraphExecutor,
    ctx: ExecutionContext,
    results: HashMap<String, NodeResult>,
    launched: HashMap<String, Instant>,
    failure: Option<RunFailure>,
    optional_failures: Vec<String>,
}

impl<'a> RunState<'a> {
    fn new(executor: &'a GraphExecutor, ctx: ExecutionContext) -> Self {
        let results = executor
            .graph
            .nodes()
            .iter()
            .map(|n| {
                let result = NodeResult {
                    node_id: n.id.clone(),
                    status: ctx.status(&n.id).unwrap_or(NodeStatus::Pending),
                    elapsed_ms: None,
                    error: None,
                };
                (n.id.clone(), result)
            })
            .collect();
        Self {
            executor,
            ctx,
            results,
            launched: HashMap::new(),
            failure: None,
            optional_failures: vec![],
        }
    }

    fn graph(&self) -> &'a WorkflowGraph {
        &self.executor.graph
    }

    fn set_status(&mut self, id: &str, status: NodeStatus) {
        self.ctx.set_status(id, status);
        if let Some(result) = self.results.get_mut(id) {
            result.status = status;
        }
    }

    /// Launch every ready node, unless the run has already failed.
    fn launch_ready<'f>(
        &mut self,
        adapters: &'f HashMap<String, NodeAdapter>,
        client: &'f dyn CapabilityClient,
        in_flight: &mut FuturesUnordered<BoxFuture<'f, Completion>>,
    ) {
        for id in self.ctx.ready(self.graph()) {
            if self.failure.is_some() {
                break;
            }
            let Some(adapter) = adapters.get(&id) else {
                continue;
            };

            let call = match adapter.prepare(&self.ctx.record) {
                Ok(call) => call,
                Err(e) => {
                    self.fail(&id, e, Some(0));
                    continue;
                }
            };

            self.set_status(&id, NodeStatus::Running);
            self.launched.insert(id.clone(), Instant::now());
            info!(
                run_id = %self.ctx.run_id,
                node_id = %id,
                capability = %adapter.node().capability,
                "Node started"
            );
            self.executor.emit(RunEvent::NodeStarted {
                run_id: self.ctx.run_id.clone(),
                node_id: id.clone(),
            });

            in_flight.push(Box::pin(async move {
                let started = Instant::now();
                let result = adapter.invoke(call, client).await;
                Completion {
                    node_id: id,
                    result,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }));
        }
    }

    /// Merge a finished call, or record its failure.
    fn settle(&mut self, completion: Completion) {
        let Completion {
            node_id,
            result,
            elapsed_ms,
        } = completion;

        let merged = result.and_then(|outputs| self.ctx.record.write_all(outputs));

        match merged {
            Ok(()) => self.complete(&node_id, elapsed_ms),
            Err(e) => self.fail(&node_id, e, Some(elapsed_ms)),
        }
    }

    fn complete(&mut self, id: &str, elapsed_ms: u64) {
        self.set_status(id, NodeStatus::Completed);
        if let Some(result) = self.results.get_mut(id) {
            result.elapsed_ms = Some(elapsed_ms);
        }
        info!(run_id = %self.ctx.run_id, node_id = %id, elapsed_ms, "Node completed");
        self.executor.emit(RunEvent::NodeCompleted {
            run_id: self.ctx.run_id.clone(),
            node_id: id.to_string(),
            elapsed_ms,
        });

        let graph = self.graph();
        for dependent in graph.dependents(id) {
            self.release(dependent);
        }

        let (selected, rejected) = graph.branches().select(id, &self.ctx.record);
        for target in selected {
            debug!(run_id = %self.ctx.run_id, from = %id, to = %target, "Branch selected");
            self.release(target);
        }
        for target in rejected {
            debug!(run_id = %self.ctx.run_id, from = %id, to = %target, "Branch not taken");
            self.skip_from(target);
        }
    }

    fn release(&mut self, id: &str) {
        if self.ctx.release(id) {
            if let Some(result) = self.results.get_mut(id) {
                result.status = NodeStatus::Ready;
            }
        }
    }

    fn fail(&mut self, id: &str, e: UnderwriteError, elapsed_ms: Option<u64>) {
        self.set_status(id, NodeStatus::Failed);
        let node_error = NodeError::from(&e);
        if let Some(result) = self.results.get_mut(id) {
            result.elapsed_ms = elapsed_ms;
            result.error = Some(node_error.clone());
        }

        let optional = self.graph().is_optional(id);
        if optional {
            warn!(run_id = %self.ctx.run_id, node_id = %id, error = %e, "Optional node failed");
        } else {
            error!(run_id = %self.ctx.run_id, node_id = %id, error = %e, "Node failed");
        }
        self.executor.emit(RunEvent::NodeFailed {
            run_id: self.ctx.run_id.clone(),
            node_id: id.to_string(),
            kind: node_error.kind.clone(),
            message: node_error.message.clone(),
        });

        self.skip_from(id);

        if optional {
            self.optional_failures.push(id.to_string());
        } else if self.failure.is_none() {
            self.failure = Some(RunFailure {
                node: id.to_string(),
                error: node_error,
            });
        }
    }

    fn skip_from(&mut self, id: &str) {
        let skipped = self.ctx.skip_from(self.graph(), id);
        self.mark_skipped(skipped);
    }

    fn mark_skipped(&mut self, ids: Vec<String>) {
        for id in ids {
            if let Some(result) = self.results.get_mut(&id) {
                result.status = NodeStatus::Skipped;
            }
            debug!(run_id = %self.ctx.run_id, node_id = %id, "Node skipped");
            self.executor.emit(RunEvent::NodeSkipped {
                run_id: self.ctx.run_id.clone(),
                node_id: id,
            });
        }
    }

    /// The run deadline passed: fail every running node and the run.
    fn expire(&mut self, limit_ms: u64) {
        warn!(run_id = %self.ctx.run_id, limit_ms, "Run deadline exceeded");
        for id in self.ctx.running(self.graph()) {
            let elapsed = self
                .launched
                .get(&id)
                .map(|t| t.elapsed().as_millis() as u64);
            let e = UnderwriteError::DeadlineExceeded(limit_ms);
            if self.failure.is_none() {
                self.failure = Some(RunFailure {
                    node: id.clone(),
                    error: NodeError::from(&e),
                });
            }
            self.fail(&id, e, elapsed);
        }
    }

    fn finish(mut self, started_at: DateTime<Utc>, start: Instant) -> RunReport {
        let leftover = self.ctx.skip_remaining(self.graph());
        self.mark_skipped(leftover);

        let outcome = match self.failure.take() {
            Some(failure) => RunOutcome::Failed {
                node: failure.node,
                kind: failure.error.kind,
                message: failure.error.message,
            },
            None => RunOutcome::Completed {
                optional_failures: std::mem::take(&mut self.optional_failures),
            },
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let succeeded = matches!(outcome, RunOutcome::Completed { .. });
        let run_id = self.ctx.run_id.clone();

        info!(run_id = %run_id, succeeded, elapsed_ms, "Run finished");
        self.executor.emit(RunEvent::RunFinished {
            run_id: run_id.clone(),
            succeeded,
            elapsed_ms,
        });

        let nodes = self
            .graph()
            .nodes()
            .iter()
            .filter_map(|n| self.results.remove(&n.id))
            .collect();

        RunReport {
            run_id,
            outcome,
            record: self.ctx.record,
            nodes,
            started_at,
            elapsed_ms,
        }
    }
}
