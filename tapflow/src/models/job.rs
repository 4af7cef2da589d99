//! Job models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::outcome::RunStatus;
use crate::errors::ErrorKind;

/// Job identifier assigned by the backend
pub type JobId = String;

/// Job priority, carried on the wire as 1, 5, 8 or 10
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            5 => Ok(Priority::Normal),
            8 => Ok(Priority::High),
            10 => Ok(Priority::Urgent),
            _ => Err(format!("Invalid priority {}, expected 1, 5, 8 or 10", value)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => 1,
            Priority::Normal => 5,
            Priority::High => 8,
            Priority::Urgent => 10,
        }
    }
}

/// How the workflows of a job are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Caller-supplied job options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub data_collection_id: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

/// Body of the backend "create job" call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub name: String,
    pub device_id: String,
    pub flow_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_collection_id: Option<String>,
    pub priority: Priority,
    pub execution_mode: ExecutionMode,
}

/// A dispatched job; immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub device_id: String,
    pub workflow_ids: Vec<String>,
    pub data_collection_id: Option<String>,
    pub priority: Priority,
    pub execution_mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
}

/// Aggregate job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Result of one workflow run inside a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunSummary {
    pub workflow_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Job status reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub total: usize,
    pub results: Vec<WorkflowRunSummary>,
}
