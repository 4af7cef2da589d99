//! Result of a workflow run

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorKind, FlowError};
use crate::models::job::WorkflowRunSummary;
use crate::models::workflow::{ExecutionState, NodeId};

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Cancelled,
}

/// Everything a caller learns about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,

    /// Output node the run ended at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<NodeId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<NodeId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub variables: HashMap<String, Value>,
    pub node_states: HashMap<NodeId, ExecutionState>,

    /// Node visits performed
    pub steps: usize,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub(crate) fn failure(&mut self, node_id: &str, err: &FlowError) {
        self.status = match err {
            FlowError::Cancelled(_) => RunStatus::Cancelled,
            _ => RunStatus::Error,
        };
        self.failed_node = Some(node_id.to_string());
        self.error_kind = Some(err.kind());
        self.message = Some(err.to_string());
    }

    pub fn summary(&self) -> WorkflowRunSummary {
        WorkflowRunSummary {
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            failed_node: self.failed_node.clone(),
            error_kind: self.error_kind,
            message: self.message.clone(),
        }
    }
}
