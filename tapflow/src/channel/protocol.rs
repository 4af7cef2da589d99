//! Device command wire protocol

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FlowError;

/// Request kinds understood by the device agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Inspect,
    VisualInspect,
    ListApps,
    StartStream,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Inspect,
        CommandKind::VisualInspect,
        CommandKind::ListApps,
        CommandKind::StartStream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Inspect => "inspect",
            CommandKind::VisualInspect => "visual_inspect",
            CommandKind::ListApps => "list_apps",
            CommandKind::StartStream => "start_stream",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request published on a device's command topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub correlation_id: String,
    pub device_id: String,
    pub kind: CommandKind,
    #[serde(default)]
    pub params: Value,
    /// Topic the agent must answer on
    pub reply_to: String,
}

/// Response published by the agent on the per-user response topic.
///
/// Kind-specific fields are kept in `data` and decoded on demand with
/// [`CommandResponse::payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Echo of the request's correlation ID; older agents omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    pub device_id: String,

    pub kind: CommandKind,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl CommandResponse {
    pub fn ok(device_id: impl Into<String>, kind: CommandKind, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            correlation_id: None,
            device_id: device_id.into(),
            kind,
            success: true,
            message: None,
            data,
        }
    }

    pub fn failed(device_id: impl Into<String>, kind: CommandKind, message: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            device_id: device_id.into(),
            kind,
            success: false,
            message: Some(message.into()),
            data: Map::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Decode the kind-specific fields
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FlowError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

// =============================== PAYLOADS ================================== //

/// Element rectangle in device pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub left: i32,
    #[serde(default)]
    pub top: i32,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
}

impl Bounds {
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDimensions {
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
}

/// Accessibility node reported by `inspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub is_clickable: bool,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default)]
    pub is_scrollable: bool,
    #[serde(default)]
    pub is_checkable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_checked: Option<bool>,
    #[serde(default)]
    pub is_focusable: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl UiElement {
    /// Text shown to the user, falling back to the content description
    pub fn display_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.content_description.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    #[serde(default)]
    pub elements: Vec<UiElement>,
    #[serde(default)]
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub screen_dimensions: ScreenDimensions,
    #[serde(default)]
    pub status_bar_height: i32,
}

/// OCR hit reported by `visual_inspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualInspectResult {
    #[serde(default)]
    pub text_elements: Vec<TextElement>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub screen_dimensions: ScreenDimensions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub package_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppList {
    #[serde(default)]
    pub apps: Vec<AppInfo>,
}
