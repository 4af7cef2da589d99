//! Recording session

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::recording::OrderedEvent;
use crate::models::workflow::Workflow;
use crate::recording::convert;
use crate::utils::generate_uuid;

/// Whether a session still accepts events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Live,
    Frozen,
}

/// Events captured on one device between a start and a stop signal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: String,
    pub device_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    events: Vec<OrderedEvent>,
    dropped: usize,
}

impl RecordingSession {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            id: generate_uuid(),
            device_id: device_id.into(),
            state: SessionState::Live,
            started_at: Utc::now(),
            stopped_at: None,
            events: Vec::new(),
            dropped: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    /// Append `event` if its sequence number is past the last accepted one
    pub fn ingest(&mut self, event: OrderedEvent) -> bool {
        if !self.is_live() {
            warn!(
                "Recording {} is frozen, dropping event {}",
                self.id, event.sequence_number
            );
            self.dropped += 1;
            return false;
        }

        if let Some(last) = self.last_sequence() {
            if event.sequence_number <= last {
                debug!(
                    "Dropping out-of-order event {} (last accepted {})",
                    event.sequence_number, last
                );
                self.dropped += 1;
                return false;
            }
        }

        self.events.push(event);
        true
    }

    pub fn stop(&mut self) {
        if self.is_live() {
            self.state = SessionState::Frozen;
            self.stopped_at = Some(Utc::now());
        }
    }

    pub fn events(&self) -> &[OrderedEvent] {
        &self.events
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.events.last().map(|e| e.sequence_number)
    }

    /// Build a linear workflow out of the accepted events
    pub fn to_workflow(&self, name: &str) -> Workflow {
        convert::to_workflow(&self.id, name, &self.events)
    }
}
