//! Observers of per-node execution state

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::workflow::{ExecutionState, NodeId};

/// One node state change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub run_id: String,
    pub node_id: NodeId,
    pub state: ExecutionState,

    /// Loop nodes: iteration being entered; `None` once the loop completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_iteration: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub at: DateTime<Utc>,
}

/// Receives node state changes as the engine produces them
pub trait StateSink: Send + Sync {
    fn emit(&self, update: NodeUpdate);
}

/// Logs every update
#[derive(Debug, Default)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn emit(&self, update: NodeUpdate) {
        debug!(
            run_id = %update.run_id,
            node_id = %update.node_id,
            state = ?update.state,
            iteration = ?update.current_iteration,
            "node state changed"
        );
    }
}

/// Forwards updates to an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NodeUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateSink for ChannelSink {
    fn emit(&self, update: NodeUpdate) {
        if self.tx.send(update).is_err() {
            warn!("Node state receiver dropped");
        }
    }
}

/// Keeps every update in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    updates: Mutex<Vec<NodeUpdate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<NodeUpdate> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Updates of one node, in emission order
    pub fn for_node(&self, node_id: &str) -> Vec<NodeUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.node_id == node_id)
            .collect()
    }
}

impl StateSink for MemorySink {
    fn emit(&self, update: NodeUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}
