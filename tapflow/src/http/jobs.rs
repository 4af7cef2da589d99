//! Job API client

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::FlowError;
use crate::http::client::HttpClient;
use crate::models::job::{CreateJobRequest, JobId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    #[serde(alias = "jobId")]
    pub id: JobId,
}

/// Backend that accepts job dispatches
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, FlowError>;
}

#[async_trait]
impl JobApi for HttpClient {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, FlowError> {
        let response: CreateJobResponse = self.post("/jobs", request).await?;
        Ok(response.id)
    }
}
