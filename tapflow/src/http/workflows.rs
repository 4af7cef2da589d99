//! Workflow API client

use async_trait::async_trait;

use crate::errors::FlowError;
use crate::http::client::HttpClient;
use crate::models::workflow::Workflow;

/// Source of workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, FlowError>;
}

#[async_trait]
impl WorkflowStore for HttpClient {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, FlowError> {
        let path = format!("/flows/{}", workflow_id);
        let mut workflow: Workflow = self.get(&path).await?;
        if workflow.id.is_empty() {
            workflow.id = workflow_id.to_string();
        }
        Ok(workflow)
    }
}
