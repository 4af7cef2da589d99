//! Recorded device event models

use serde::{Deserialize, Serialize};

use crate::models::workflow::{ActionType, Direction, Point};

/// A live device event captured during a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedEvent {
    /// Strictly increasing within one session
    pub sequence_number: u64,

    /// Gesture the user performed
    pub event_type: ActionType,

    /// Event-specific fields
    #[serde(flatten)]
    pub payload: EventPayload,

    /// Reference to the screenshot taken when the event fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
}

impl OrderedEvent {
    pub fn new(sequence_number: u64, event_type: ActionType) -> Self {
        Self {
            sequence_number,
            event_type,
            payload: EventPayload::default(),
            screenshot_ref: None,
        }
    }
}

/// Event-specific fields of a recorded event
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_coordinates: Option<Point>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<i32>,
}

/// Message published by the device agent on its recording topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum RecordingSignal {
    Start,
    Event { event: OrderedEvent },
    Stop,
}
