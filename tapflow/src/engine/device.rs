//! Device-facing seams of the engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::protocol::InspectResult;
use crate::channel::topics::Topics;
use crate::channel::transport::{publish_json, Transport};
use crate::channel::CommandChannel;
use crate::errors::FlowError;
use crate::models::workflow::ActionConfig;
use crate::utils::generate_uuid;

/// Reads the device's current UI
#[async_trait]
pub trait DeviceInspector: Send + Sync {
    async fn inspect(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<InspectResult, FlowError>;

    /// Latest inspection if still fresh
    fn cached_inspection(&self, _device_id: &str) -> Option<InspectResult> {
        None
    }
}

#[async_trait]
impl DeviceInspector for CommandChannel {
    async fn inspect(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<InspectResult, FlowError> {
        CommandChannel::inspect(self, device_id, timeout, cancel).await
    }

    fn cached_inspection(&self, device_id: &str) -> Option<InspectResult> {
        CommandChannel::cached_inspection(self, device_id)
    }
}

/// Performs gestures on the device
#[async_trait]
pub trait DeviceActions: Send + Sync {
    /// Perform one gesture and wait for its completion signal
    async fn perform(
        &self,
        device_id: &str,
        action: &ActionConfig,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), FlowError>;

    /// A run on `device_id` begins
    async fn attach(&self, _device_id: &str) {}

    /// A run on `device_id` ended
    async fn detach(&self, _device_id: &str) {}
}

/// Gesture published on the device execute topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCommand {
    pub action_id: String,
    pub device_id: String,
    #[serde(flatten)]
    pub action: ActionConfig,
}

/// Completion signal published by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Default)]
struct ResultSubscription {
    runs: usize,
    in_flight: usize,
    active: bool,
}

/// Sends gestures over the transport and awaits their results.
///
/// A device's result topic stays subscribed while a run is attached to it or
/// an action is awaiting its result.
pub struct TransportActions {
    transport: Arc<dyn Transport>,
    devices: Mutex<HashMap<String, ResultSubscription>>,
}

impl TransportActions {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            devices: Mutex::new(HashMap::new()),
        }
    }

    async fn begin_action(&self, device_id: &str) -> Result<(), FlowError> {
        let mut devices = self.devices.lock().await;
        let entry = devices.entry(device_id.to_string()).or_default();
        if !entry.active {
            self.transport
                .subscribe(&Topics::action_results(device_id))
                .await?;
            entry.active = true;
        }
        entry.in_flight += 1;
        Ok(())
    }

    async fn end_action(&self, device_id: &str) {
        let mut devices = self.devices.lock().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        self.settle(&mut devices, device_id).await;
    }

    /// Drop the result subscription once nothing needs it
    async fn settle(&self, devices: &mut HashMap<String, ResultSubscription>, device_id: &str) {
        let idle = devices
            .get(device_id)
            .is_some_and(|e| e.runs == 0 && e.in_flight == 0);
        if !idle {
            return;
        }
        if let Some(entry) = devices.remove(device_id) {
            if entry.active {
                let topic = Topics::action_results(device_id);
                if let Err(e) = self.transport.unsubscribe(&topic).await {
                    warn!("Failed to unsubscribe from {}: {}", topic, e);
                }
            }
        }
    }

    /// Devices whose result topic is currently subscribed
    pub async fn subscribed_devices(&self) -> Vec<String> {
        self.devices
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.active)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceActions for TransportActions {
    async fn perform(
        &self,
        device_id: &str,
        action: &ActionConfig,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), FlowError> {
        self.begin_action(device_id).await?;
        let result = self.exchange(device_id, action, timeout, cancel).await;
        self.end_action(device_id).await;
        result
    }

    async fn attach(&self, device_id: &str) {
        let mut devices = self.devices.lock().await;
        devices.entry(device_id.to_string()).or_default().runs += 1;
    }

    async fn detach(&self, device_id: &str) {
        let mut devices = self.devices.lock().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.runs = entry.runs.saturating_sub(1);
        }
        self.settle(&mut devices, device_id).await;
    }
}

impl TransportActions {
    async fn exchange(
        &self,
        device_id: &str,
        action: &ActionConfig,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), FlowError> {
        let mut messages = self.transport.messages();

        let command = ActionCommand {
            action_id: generate_uuid(),
            device_id: device_id.to_string(),
            action: ActionConfig {
                repeat_count: 1,
                ..action.clone()
            },
        };
        publish_json(
            self.transport.as_ref(),
            &Topics::device_execute(device_id),
            &command,
        )
        .await?;
        debug!("Sent {:?} action {} to device {}", action.action, command.action_id, device_id);

        let result_topic = Topics::action_results(device_id);
        let wait = async {
            loop {
                match messages.recv().await {
                    Ok(message) if message.topic == result_topic => {
                        match message.parse_json::<ActionResult>() {
                            Ok(result) if result.action_id == command.action_id => return Ok(result),
                            Ok(_) => {}
                            Err(e) => warn!("Ignoring malformed action result: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Action listener lagged, {} message(s) dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(FlowError::TransportError("transport closed".to_string()));
                    }
                }
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FlowError::Cancelled(format!("action {} cancelled", command.action_id)));
            }
            result = tokio::time::timeout(timeout, wait) => result.map_err(|_| {
                FlowError::Timeout(format!(
                    "device {} did not complete {:?} within {}ms",
                    device_id,
                    action.action,
                    timeout.as_millis()
                ))
            })??,
        };

        if result.success {
            Ok(())
        } else {
            Err(FlowError::ActionError(
                result
                    .message
                    .unwrap_or_else(|| format!("{:?} failed on device {}", action.action, device_id)),
            ))
        }
    }
}
