use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use tapflow::channel::{ChannelOptions, CommandChannel, MemoryTransport};
use tapflow::graph::validate;
use tapflow::http::workflows::WorkflowStore;
use tapflow::models::recording::{OrderedEvent, RecordingSignal};
use tapflow::models::workflow::{ActionType, Point};
use tapflow::recording::RecordingStore;
use tapflow::server::serve::router;
use tapflow::server::state::ServerState;
use tapflow::storage::layout::StorageLayout;
use tapflow::storage::workflows::LocalWorkflowStore;

use crate::fakes::setup;

struct TestApp {
    router: Router,
    recordings: RecordingStore,
    workflows: Arc<LocalWorkflowStore>,
    _dir: tempfile::TempDir,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    app_at(dir, base)
}

fn app_at(dir: tempfile::TempDir, base: std::path::PathBuf) -> TestApp {
    let transport = Arc::new(MemoryTransport::new());
    let channel = CommandChannel::open("user-1", transport, ChannelOptions::default());
    let recordings = RecordingStore::new();
    let workflows = Arc::new(LocalWorkflowStore::new(StorageLayout::new(base), None));
    let state = Arc::new(ServerState::new(
        channel,
        setup().orchestrator,
        recordings.clone(),
        workflows.clone(),
    ));
    TestApp {
        router: router(state),
        recordings,
        workflows,
        _dir: dir,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_job_lifecycle_over_http() {
    let app = app();
    let (status, body) = call(
        &app.router,
        "POST",
        "/jobs",
        Some(json!({"deviceId": "dev-1", "workflowIds": ["login"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, body) = call(&app.router, "GET", &format!("/jobs/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "pending");

    let (status, body) = call(&app.router, "POST", &format!("/jobs/{}/cancel", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "cancelled");
}

#[tokio::test]
async fn test_job_errors_map_to_status_codes() {
    let app = app();
    let (status, body) = call(
        &app.router,
        "POST",
        "/jobs",
        Some(json!({"deviceId": "dev-1", "workflowIds": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, _) = call(
        &app.router,
        "POST",
        "/jobs",
        Some(json!({"deviceId": "dev-9", "workflowIds": ["login"]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app.router, "GET", "/jobs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_import_recording_saves_workflow() {
    let app = app();
    let mut tap = OrderedEvent::new(1, ActionType::Tap);
    tap.payload.coordinates = Some(Point { x: 4, y: 8 });
    app.recordings.apply("dev-1", RecordingSignal::Start).unwrap();
    app.recordings
        .apply("dev-1", RecordingSignal::Event { event: tap })
        .unwrap();
    app.recordings.apply("dev-1", RecordingSignal::Stop).unwrap();

    let (status, body) = call(
        &app.router,
        "POST",
        "/recordings/dev-1/import",
        Some(json!({"name": "checkout"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "checkout");

    let id = body["id"].as_str().unwrap();
    let saved = app.workflows.get_workflow(id).await.unwrap();
    assert_eq!(saved.nodes.len(), 3);

    // the session was consumed by the import
    let (status, _) = call(&app.router, "POST", "/recordings/dev-1/import", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn record(recordings: &RecordingStore, device_id: &str, events: Vec<OrderedEvent>) {
    recordings.apply(device_id, RecordingSignal::Start).unwrap();
    for event in events {
        recordings
            .apply(device_id, RecordingSignal::Event { event })
            .unwrap();
    }
    recordings.apply(device_id, RecordingSignal::Stop).unwrap();
}

#[tokio::test]
async fn test_import_skips_events_without_target() {
    let app = app();
    let mut typed = OrderedEvent::new(2, ActionType::TypeText);
    typed.payload.text = Some("hello".to_string());
    record(
        &app.recordings,
        "dev-1",
        vec![OrderedEvent::new(1, ActionType::Tap), typed],
    );

    let (status, body) = call(&app.router, "POST", "/recordings/dev-1/import", None).await;
    assert_eq!(status, StatusCode::CREATED);

    let saved = app
        .workflows
        .get_workflow(body["id"].as_str().unwrap())
        .await
        .unwrap();
    assert!(validate(&saved).is_ok());
    assert_eq!(saved.nodes.len(), 3);
}

#[tokio::test]
async fn test_failed_import_keeps_recording() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let app = app_at(dir, blocker.join("storage"));

    record(
        &app.recordings,
        "dev-1",
        vec![OrderedEvent::new(1, ActionType::Back)],
    );

    let (status, _) = call(&app.router, "POST", "/recordings/dev-1/import", None).await;
    assert!(status.is_server_error());
    assert!(app.recordings.frozen("dev-1").is_ok());
}

#[tokio::test]
async fn test_stream_status_defaults_to_idle() {
    let app = app();
    let (status, body) = call(&app.router, "GET", "/devices/dev-1/stream", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
}
