//! Error types for tapflow

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::protocol::CommandKind;
use crate::models::workflow::{NodeId, Port};

/// Main error type for tapflow
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid workflow: {0}")]
    Structural(#[from] StructuralError),

    #[error("Busy: a {kind} request for device {device_id} is already in flight")]
    Busy { device_id: String, kind: CommandKind },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Action error: {0}")]
    ActionError(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Stable classification reported alongside failed runs
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::IoError(_) => ErrorKind::Io,
            FlowError::JsonError(_) => ErrorKind::Serialization,
            FlowError::HttpError(_) => ErrorKind::Http,
            FlowError::Structural(_) => ErrorKind::Structural,
            FlowError::Busy { .. } => ErrorKind::Busy,
            FlowError::Timeout(_) => ErrorKind::Timeout,
            FlowError::RemoteError(_) => ErrorKind::RemoteError,
            FlowError::NotFound(_) => ErrorKind::NotFound,
            FlowError::Cancelled(_) => ErrorKind::Cancelled,
            FlowError::TransportError(_) => ErrorKind::Transport,
            FlowError::ConfigError(_) => ErrorKind::Config,
            FlowError::ValidationError(_) => ErrorKind::Validation,
            FlowError::ActionError(_) => ErrorKind::Action,
            FlowError::AssertionFailed(_) => ErrorKind::Assertion,
            FlowError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may reasonably try the same operation again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Timeout(_)
                | FlowError::NotFound(_)
                | FlowError::Busy { .. }
                | FlowError::TransportError(_)
        )
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Internal(err.to_string())
    }
}

/// Error classification attached to run and job results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Serialization,
    Http,
    Structural,
    Busy,
    Timeout,
    RemoteError,
    NotFound,
    Cancelled,
    Transport,
    Config,
    Validation,
    Action,
    Assertion,
    Internal,
}

/// Reasons a workflow graph is rejected before it runs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("workflow has no Input node")]
    MissingInput,

    #[error("workflow has {0} Input nodes, expected exactly one")]
    MultipleInputs(usize),

    #[error("workflow has no Output node")]
    MissingOutput,

    #[error("no Output node is reachable from node {0}")]
    UnreachableOutput(NodeId),

    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    #[error("edge {edge} references unknown node {node}")]
    DanglingEdge { edge: String, node: NodeId },

    #[error("node {node} has no {port} port")]
    InvalidPort { node: NodeId, port: Port },

    #[error("node {node} has more than one edge on port {port}")]
    DuplicatePortEdge { node: NodeId, port: Port },

    #[error("node {node} is missing an edge on required port {port}")]
    UnwiredPort { node: NodeId, port: Port },

    #[error("node {0} has no incoming edge")]
    OrphanNode(NodeId),

    #[error("cycle through node {0} does not pass through a Loop node's loop port")]
    IllegalCycle(NodeId),

    #[error("node {node} has invalid configuration: {reason}")]
    InvalidConfig { node: NodeId, reason: String },
}
