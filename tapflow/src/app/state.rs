//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::channel::transport::Transport;
use crate::channel::CommandChannel;
use crate::engine::device::TransportActions;
use crate::engine::executor::Executor;
use crate::engine::services::HttpServices;
use crate::engine::sink::TracingSink;
use crate::errors::FlowError;
use crate::http::client::HttpClient;
use crate::http::workflows::WorkflowStore;
use crate::jobs::JobOrchestrator;
use crate::recording::RecordingStore;
use crate::storage::workflows::LocalWorkflowStore;

/// Main application state
pub struct AppState {
    /// Broker connection shared by every component
    pub transport: Arc<dyn Transport>,

    /// Request/response channel to the user's devices
    pub channel: CommandChannel,

    /// Recording sessions fed by the recorder worker
    pub recordings: RecordingStore,

    /// Imported and backend workflows
    pub workflows: Arc<LocalWorkflowStore>,

    /// Job creation and execution
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    /// Initialize application state
    pub fn init(options: &AppOptions, transport: Arc<dyn Transport>) -> Result<Self, FlowError> {
        info!("Initializing application state...");

        let http_client = Arc::new(HttpClient::new(
            &options.backend_base_url,
            options.backend_token.clone(),
        )?);

        let channel = CommandChannel::open(&options.user_id, transport.clone(), options.channel.clone());

        let services = Arc::new(HttpServices::new(
            http_client.as_ref().clone(),
            options.ai.clone(),
            options.storage.files_dir(),
        ));
        let executor = Arc::new(Executor::new(
            Arc::new(channel.clone()),
            Arc::new(TransportActions::new(transport.clone())),
            services,
            Arc::new(TracingSink),
            options.executor.clone(),
        ));

        let remote: Arc<dyn WorkflowStore> = http_client.clone();
        let workflows = Arc::new(LocalWorkflowStore::new(options.storage.clone(), Some(remote)));
        let orchestrator = Arc::new(JobOrchestrator::new(
            http_client.clone(),
            http_client,
            workflows.clone(),
            executor,
        ));

        Ok(Self {
            transport,
            channel,
            recordings: RecordingStore::new(),
            workflows,
            orchestrator,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), FlowError> {
        info!("Shutting down application state...");
        self.channel.close().await;
        Ok(())
    }
}
