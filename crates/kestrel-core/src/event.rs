use crate::types::RunId;

/// Lifecycle event for a run, broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Run started.
    RunStarted { run_id: RunId, role: String },
    /// A node began executing.
    NodeStarted {
        run_id: RunId,
        node_id: String,
        node_type: String,
    },
    /// A node finished and picked an output port.
    NodeCompleted {
        run_id: RunId,
        node_id: String,
        port: String,
        elapsed_ms: u64,
    },
    /// A node was skipped (unregistered type or dangling id).
    NodeSkipped {
        run_id: RunId,
        node_id: String,
        reason: String,
    },
    /// Run reached the end of every branch.
    RunCompleted { run_id: RunId, steps: usize },
    /// Run ended on an unrecovered failure.
    RunFailed {
        run_id: RunId,
        kind: String,
        message: String,
    },
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
