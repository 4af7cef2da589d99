//! Recording listener worker

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::channel::topics::Topics;
use crate::channel::transport::{Message, Transport};
use crate::models::recording::RecordingSignal;
use crate::recording::RecordingStore;

/// Feed recording signals of every device into `store` until shutdown
pub async fn run(
    transport: &dyn Transport,
    store: &RecordingStore,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Recorder worker starting...");

    let mut messages = transport.messages();
    let filter = Topics::all_recording_events();
    if let Err(e) = transport.subscribe(&filter).await {
        error!("Failed to subscribe to {}: {}", filter, e);
        return;
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Recorder worker shutting down...");
                if let Err(e) = transport.unsubscribe(&filter).await {
                    warn!("Failed to unsubscribe from {}: {}", filter, e);
                }
                return;
            }
            received = messages.recv() => match received {
                Ok(message) => handle_message(&message, store),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Recorder lagged behind, {} message(s) skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Transport closed, recorder worker exiting");
                    return;
                }
            }
        }
    }
}

fn handle_message(message: &Message, store: &RecordingStore) {
    if !Topics::is_recording_topic(&message.topic) {
        return;
    }
    let Some(device_id) = Topics::parse_device_id(&message.topic) else {
        return;
    };

    match message.parse_json::<RecordingSignal>() {
        Ok(signal) => {
            debug!("Recording signal from {}: {:?}", device_id, signal);
            if let Err(e) = store.apply(&device_id, signal) {
                error!("Failed to apply recording signal from {}: {}", device_id, e);
            }
        }
        Err(e) => warn!("Malformed recording message from {}: {}", device_id, e),
    }
}
