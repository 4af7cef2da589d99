//! Test doubles for the device, service and backend seams

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tapflow::channel::protocol::{Bounds, InspectResult, ScreenDimensions, UiElement};
use tapflow::engine::device::{DeviceActions, DeviceInspector};
use tapflow::engine::executor::{Executor, ExecutorOptions};
use tapflow::engine::services::{CompletionRequest, ExternalServices, WebhookRequest};
use tapflow::engine::sink::MemorySink;
use tapflow::errors::FlowError;
use tapflow::http::devices::DeviceRegistry;
use tapflow::http::jobs::JobApi;
use tapflow::http::workflows::WorkflowStore;
use tapflow::jobs::JobOrchestrator;
use tapflow::models::job::{CreateJobRequest, JobId};
use tapflow::models::workflow::{
    ActionConfig, ActionType, Edge, InputConfig, Node, NodeKind, OutputConfig, Point, Port,
    Workflow,
};

/// Screen whose resource ids can change between inspections
#[derive(Default)]
pub struct FakeScreen {
    ids: Mutex<Vec<String>>,
    pub inspections: AtomicUsize,
}

impl FakeScreen {
    pub fn showing(ids: &[&str]) -> Arc<Self> {
        let screen = Arc::new(Self::default());
        screen.show(ids);
        screen
    }

    pub fn show(&self, ids: &[&str]) {
        *self.ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl DeviceInspector for FakeScreen {
    async fn inspect(
        &self,
        _device_id: &str,
        _timeout: Option<Duration>,
        _cancel: &CancellationToken,
    ) -> Result<InspectResult, FlowError> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        let elements = self
            .ids
            .lock()
            .unwrap()
            .iter()
            .map(|id| UiElement {
                resource_id: Some(id.clone()),
                bounds: Bounds {
                    left: 0,
                    top: 0,
                    width: 100,
                    height: 50,
                },
                ..Default::default()
            })
            .collect();
        Ok(InspectResult {
            elements,
            package_name: "com.example".to_string(),
            screen_dimensions: ScreenDimensions {
                width: 1080,
                height: 1920,
            },
            ..Default::default()
        })
    }
}

/// Records every gesture it performs
#[derive(Default)]
pub struct FakeActions {
    performed: Mutex<Vec<ActionConfig>>,
}

impl FakeActions {
    pub fn performed(&self) -> Vec<ActionConfig> {
        self.performed.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.performed.lock().unwrap().len()
    }
}

#[async_trait]
impl DeviceActions for FakeActions {
    async fn perform(
        &self,
        _device_id: &str,
        action: &ActionConfig,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), FlowError> {
        self.performed.lock().unwrap().push(action.clone());
        if action.text.as_deref() == Some("fail") {
            return Err(FlowError::ActionError("gesture rejected".to_string()));
        }
        Ok(())
    }
}

/// Serves fixed collections; everything else is missing
#[derive(Default)]
pub struct FakeServices {
    pub collections: HashMap<String, Value>,
}

#[async_trait]
impl ExternalServices for FakeServices {
    async fn fetch_collection(&self, collection_id: &str) -> Result<Value, FlowError> {
        self.collections
            .get(collection_id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(collection_id.to_string()))
    }

    async fn resolve_file(&self, path: &str) -> Result<Value, FlowError> {
        Err(FlowError::NotFound(path.to_string()))
    }

    async fn call_webhook(&self, request: &WebhookRequest) -> Result<Value, FlowError> {
        Err(FlowError::NotFound(request.url.clone()))
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, FlowError> {
        Err(FlowError::NotFound("model".to_string()))
    }
}

// =============================== BACKEND ================================== //

#[derive(Default)]
pub struct FakeJobApi {
    pub created: Mutex<Vec<CreateJobRequest>>,
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, FlowError> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(format!("job-{}", created.len()))
    }
}

pub struct KnownDevices(pub Vec<&'static str>);

#[async_trait]
impl DeviceRegistry for KnownDevices {
    async fn device_exists(&self, device_id: &str) -> Result<bool, FlowError> {
        Ok(self.0.contains(&device_id))
    }
}

pub struct Library(pub HashMap<String, Workflow>);

#[async_trait]
impl WorkflowStore for Library {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, FlowError> {
        self.0
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("workflow {}", workflow_id)))
    }
}

// =============================== HARNESS ================================== //

pub struct Harness {
    pub screen: Arc<FakeScreen>,
    pub actions: Arc<FakeActions>,
    pub sink: Arc<MemorySink>,
    pub executor: Executor,
}

pub fn harness(screen: Arc<FakeScreen>, services: FakeServices) -> Harness {
    let actions = Arc::new(FakeActions::default());
    let sink = Arc::new(MemorySink::new());
    let executor = Executor::new(
        screen.clone(),
        actions.clone(),
        Arc::new(services),
        sink.clone(),
        ExecutorOptions::default(),
    );
    Harness {
        screen,
        actions,
        sink,
        executor,
    }
}

pub fn tap(text: &str) -> NodeKind {
    let mut action = ActionConfig::new(ActionType::Tap);
    action.text = Some(text.to_string());
    action.coordinates = Some(Point { x: 10, y: 10 });
    NodeKind::Action(action)
}

pub fn edge(source: &str, port: Port, target: &str) -> Edge {
    Edge::new(source, port, target)
}

pub fn single_tap(id: &str, text: &str) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        nodes: vec![
            Node::new("in", NodeKind::Input(InputConfig::default())),
            Node::new("tap", tap(text)),
            Node::new("out", NodeKind::Output(OutputConfig::default())),
        ],
        edges: vec![
            edge("in", Port::Default, "tap"),
            edge("tap", Port::Default, "out"),
        ],
    }
}

pub struct Setup {
    pub api: Arc<FakeJobApi>,
    pub actions: Arc<FakeActions>,
    pub orchestrator: Arc<JobOrchestrator>,
}

pub fn setup() -> Setup {
    let library = Library(HashMap::from([
        ("login".to_string(), single_tap("login", "{{deviceId}}")),
        ("broken".to_string(), single_tap("broken", "fail")),
        ("logout".to_string(), single_tap("logout", "Logout")),
    ]));
    let api = Arc::new(FakeJobApi::default());
    let actions = Arc::new(FakeActions::default());
    let executor = Executor::new(
        FakeScreen::showing(&[]),
        actions.clone(),
        Arc::new(FakeServices::default()),
        Arc::new(MemorySink::new()),
        ExecutorOptions::default(),
    );
    let orchestrator = Arc::new(JobOrchestrator::new(
        api.clone(),
        Arc::new(KnownDevices(vec!["dev-1"])),
        Arc::new(library),
        Arc::new(executor),
    ));
    Setup {
        api,
        actions,
        orchestrator,
    }
}
