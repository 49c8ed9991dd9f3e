use serde::Serialize;

use crate::types::RunId;

/// Progress of a graph run, as observed from outside the executor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { run_id: RunId },
    NodeStarted { run_id: RunId, node_id: String },
    NodeCompleted { run_id: RunId, node_id: String, elapsed_ms: u64 },
    NodeFailed { run_id: RunId, node_id: String, kind: String, message: String },
    NodeSkipped { run_id: RunId, node_id: String },
    RunFinished { run_id: RunId, succeeded: bool, elapsed_ms: u64 },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
