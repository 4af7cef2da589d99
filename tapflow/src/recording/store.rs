//! Recording sessions keyed by device

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::errors::FlowError;
use crate::models::recording::RecordingSignal;
use crate::recording::session::RecordingSession;

#[derive(Default)]
struct Recordings {
    /// Devices that sent `start` but no event yet
    armed: HashSet<String>,
    sessions: HashMap<String, RecordingSession>,
}

/// Latest recording session of every device.
///
/// A session only exists once the first event after `start` arrives.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Mutex<Recordings>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Recordings>, FlowError> {
        self.inner
            .lock()
            .map_err(|e| FlowError::Internal(format!("recording store poisoned: {}", e)))
    }

    /// Apply a lifecycle signal received from `device_id`
    pub fn apply(&self, device_id: &str, signal: RecordingSignal) -> Result<(), FlowError> {
        let mut recordings = self.lock()?;

        match signal {
            RecordingSignal::Start => {
                if let Some(previous) = recordings.sessions.remove(device_id) {
                    if previous.is_live() {
                        warn!(
                            "Recording {} on device {} replaced before it was stopped",
                            previous.id, device_id
                        );
                    }
                }
                recordings.armed.insert(device_id.to_string());
                info!("Recording started on device {}", device_id);
            }
            RecordingSignal::Event { event } => {
                if recordings.armed.remove(device_id) {
                    let session = RecordingSession::new(device_id);
                    info!("Recording {} opened on device {}", session.id, device_id);
                    recordings.sessions.insert(device_id.to_string(), session);
                }
                match recordings.sessions.get_mut(device_id) {
                    Some(session) => {
                        session.ingest(event);
                    }
                    None => warn!(
                        "Event {} from device {} without a recording session",
                        event.sequence_number, device_id
                    ),
                }
            }
            RecordingSignal::Stop => {
                if recordings.armed.remove(device_id) {
                    info!("Recording on device {} stopped before any event", device_id);
                    return Ok(());
                }
                match recordings.sessions.get_mut(device_id) {
                    Some(session) => {
                        session.stop();
                        info!(
                            "Recording {} stopped on device {} with {} event(s)",
                            session.id,
                            device_id,
                            session.events().len()
                        );
                    }
                    None => warn!("Stop from device {} without a recording session", device_id),
                }
            }
        }
        Ok(())
    }

    /// Snapshot of the device's latest session
    pub fn session(&self, device_id: &str) -> Option<RecordingSession> {
        self.lock()
            .ok()
            .and_then(|recordings| recordings.sessions.get(device_id).cloned())
    }

    /// Snapshot of the device's session once it is frozen
    pub fn frozen(&self, device_id: &str) -> Result<RecordingSession, FlowError> {
        let recordings = self.lock()?;
        if recordings.armed.contains(device_id) {
            return Err(FlowError::ValidationError(format!(
                "recording on device {} is still live",
                device_id
            )));
        }

        match recordings.sessions.get(device_id) {
            None => Err(FlowError::NotFound(format!(
                "no recording for device {}",
                device_id
            ))),
            Some(session) if session.is_live() => Err(FlowError::ValidationError(format!(
                "recording {} on device {} is still live",
                session.id, device_id
            ))),
            Some(session) => Ok(session.clone()),
        }
    }

    /// Drop the device's session if it is still `session_id`
    pub fn discard(&self, device_id: &str, session_id: &str) -> Result<bool, FlowError> {
        let mut recordings = self.lock()?;
        if recordings
            .sessions
            .get(device_id)
            .is_some_and(|s| s.id == session_id)
        {
            recordings.sessions.remove(device_id);
            return Ok(true);
        }
        Ok(false)
    }
}
