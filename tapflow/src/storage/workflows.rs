//! Locally stored workflows

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::FlowError;
use crate::http::workflows::WorkflowStore;
use crate::models::workflow::Workflow;
use crate::storage::layout::StorageLayout;

/// Workflows saved under the storage layout, falling back to a remote store
pub struct LocalWorkflowStore {
    layout: StorageLayout,
    fallback: Option<Arc<dyn WorkflowStore>>,
}

impl LocalWorkflowStore {
    pub fn new(layout: StorageLayout, fallback: Option<Arc<dyn WorkflowStore>>) -> Self {
        Self { layout, fallback }
    }

    pub async fn save(&self, workflow: &Workflow) -> Result<(), FlowError> {
        if workflow.id.is_empty() {
            return Err(FlowError::ValidationError("workflow id is empty".to_string()));
        }
        let file = self.layout.workflow_file(&workflow.id);
        file.write_json(workflow).await?;
        info!("Saved workflow {} to {}", workflow.id, file.path().display());
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for LocalWorkflowStore {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, FlowError> {
        let file = self.layout.workflow_file(workflow_id);
        if file.exists().await {
            debug!("Loading workflow {} from {}", workflow_id, file.path().display());
            let mut workflow: Workflow = file.read_json().await?;
            if workflow.id.is_empty() {
                workflow.id = workflow_id.to_string();
            }
            return Ok(workflow);
        }

        match &self.fallback {
            Some(remote) => remote.get_workflow(workflow_id).await,
            None => Err(FlowError::NotFound(format!("workflow {}", workflow_id))),
        }
    }
}
