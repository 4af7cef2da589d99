//! Server state

use std::sync::Arc;

use crate::channel::CommandChannel;
use crate::jobs::JobOrchestrator;
use crate::recording::RecordingStore;
use crate::storage::workflows::LocalWorkflowStore;

/// Server state shared across handlers
pub struct ServerState {
    pub channel: CommandChannel,
    pub orchestrator: Arc<JobOrchestrator>,
    pub recordings: RecordingStore,
    pub workflows: Arc<LocalWorkflowStore>,
}

impl ServerState {
    pub fn new(
        channel: CommandChannel,
        orchestrator: Arc<JobOrchestrator>,
        recordings: RecordingStore,
        workflows: Arc<LocalWorkflowStore>,
    ) -> Self {
        Self {
            channel,
            orchestrator,
            recordings,
            workflows,
        }
    }
}
