//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::FlowError;
use crate::server::handlers::{
    cancel_job_handler, create_job_handler, health_handler, import_recording_handler,
    job_status_handler, run_job_handler, start_stream_handler, stream_status_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Routes of the local control API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Jobs
        .route("/jobs", post(create_job_handler))
        .route("/jobs/{id}", get(job_status_handler))
        .route("/jobs/{id}/run", post(run_job_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        // Recordings
        .route("/recordings/{device_id}/import", post(import_recording_handler))
        // Devices
        .route(
            "/devices/{device_id}/stream",
            get(stream_status_handler).post(start_stream_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), FlowError>>, FlowError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(FlowError::from)
    });

    Ok(handle)
}
