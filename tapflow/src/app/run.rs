//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::channel::transport::Transport;
use crate::channel::MemoryTransport;
use crate::errors::FlowError;
use crate::mqtt::client::{connect, MqttConnection};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{mqtt, recorder};

/// Run the service until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FlowError> {
    info!("Initializing tapflow...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start tapflow: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, FlowError> {
    options.storage.setup().await?;

    let transport = init_transport(options, shutdown_manager, shutdown_tx.subscribe())?;

    let app_state = Arc::new(AppState::init(options, transport)?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if options.enable_recorder {
        init_recorder_worker(app_state.clone(), shutdown_manager, shutdown_tx.subscribe())?;
    }

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

fn init_transport(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<Arc<dyn Transport>, FlowError> {
    if !options.enable_mqtt {
        warn!("MQTT disabled, using an in-memory transport");
        return Ok(Arc::new(MemoryTransport::new()));
    }

    info!(
        "Connecting to MQTT broker: {}:{}",
        options.mqtt_broker.host, options.mqtt_broker.port
    );
    let client_id = format!("tapflow-{}", options.user_id);
    let (transport, connection) = connect(&options.mqtt_broker, &client_id)?;
    init_mqtt_worker(options.mqtt_worker.clone(), connection, shutdown_manager, shutdown_rx)?;
    Ok(transport)
}

fn init_mqtt_worker(
    options: mqtt::Options,
    connection: MqttConnection,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FlowError> {
    info!("Initializing MQTT worker...");

    let mqtt_handle = tokio::spawn(async move {
        mqtt::run(
            &options,
            connection,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle)
}

fn init_recorder_worker(
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FlowError> {
    info!("Initializing recorder worker...");

    let recorder_handle = tokio::spawn(async move {
        recorder::run(
            app_state.transport.as_ref(),
            &app_state.recordings,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_recorder_worker_handle(recorder_handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FlowError> {
    info!("Initializing local HTTP server...");

    let state = Arc::new(ServerState::new(
        app_state.channel.clone(),
        app_state.orchestrator.clone(),
        app_state.recordings.clone(),
        app_state.workflows.clone(),
    ));

    let server_handle = serve(&options.server, state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// =============================== SHUTDOWN ================================== //

/// Joins every spawned component once the shutdown signal is broadcast
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), FlowError>>>,
    recorder_worker_handle: Option<JoinHandle<()>>,
    mqtt_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            recorder_worker_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), FlowError> {
        if self.app_state.is_some() {
            return Err(FlowError::Internal("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), FlowError>>,
    ) -> Result<(), FlowError> {
        if self.server_handle.is_some() {
            return Err(FlowError::Internal("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_recorder_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), FlowError> {
        if self.recorder_worker_handle.is_some() {
            return Err(FlowError::Internal("recorder_handle already set".to_string()));
        }
        self.recorder_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), FlowError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(FlowError::Internal("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FlowError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", max_delay);
                Err(FlowError::Timeout(format!("shutdown exceeded {:?}", max_delay)))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), FlowError> {
        info!("Shutting down tapflow...");

        // 1. Server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| FlowError::Internal(e.to_string()))??;
        }

        // 2. Recorder worker
        if let Some(handle) = self.recorder_worker_handle.take() {
            handle.await.map_err(|e| FlowError::Internal(e.to_string()))?;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        // 4. MQTT worker
        if let Some(handle) = self.mqtt_worker_handle.take() {
            handle.await.map_err(|e| FlowError::Internal(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
