//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{ErrorKind, FlowError};
use crate::graph::validate;
use crate::models::job::{JobId, JobOptions};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "tapflow".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// =============================== ERRORS ================================== //

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// [`FlowError`] rendered as a JSON response
pub struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlowError::NotFound(_) => StatusCode::NOT_FOUND,
            FlowError::ValidationError(_) | FlowError::Structural(_) | FlowError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            FlowError::Busy { .. } | FlowError::Cancelled(_) => StatusCode::CONFLICT,
            FlowError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FlowError::RemoteError(_) | FlowError::HttpError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================== JOBS ================================== //

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobBody {
    pub device_id: String,
    pub workflow_ids: Vec<String>,
    #[serde(flatten)]
    pub options: JobOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

pub async fn create_job_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state
        .orchestrator
        .create_job(&body.device_id, body.workflow_ids, body.options)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

pub async fn job_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .orchestrator
        .status(&job_id)
        .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?;
    Ok(Json(status))
}

pub async fn run_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.orchestrator.start(&job_id)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn cancel_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.cancel(&job_id)?))
}

// =============================== RECORDINGS ================================== //

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecordingBody {
    #[serde(default)]
    pub name: Option<String>,
}

/// Convert the device's stopped recording into a stored workflow
pub async fn import_recording_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    body: Option<Json<ImportRecordingBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = state.recordings.frozen(&device_id)?;
    let name = body
        .name
        .unwrap_or_else(|| format!("Recording on {}", device_id));

    let workflow = session.to_workflow(&name);
    validate(&workflow).map_err(FlowError::from)?;
    state.workflows.save(&workflow).await?;
    state.recordings.discard(&device_id, &session.id)?;
    info!(
        "Imported recording {} from device {} as workflow {}",
        session.id, device_id, workflow.id
    );
    Ok((StatusCode::CREATED, Json(workflow)))
}

// =============================== DEVICES ================================== //

pub async fn stream_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    Json(state.channel.stream_status(&device_id))
}

pub async fn start_stream_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .channel
        .start_stream(&device_id, &CancellationToken::new())
        .await?;
    Ok(Json(state.channel.stream_status(&device_id)))
}
