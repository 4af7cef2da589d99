//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::FlowError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// User whose response topic the command channel listens on
    #[serde(default)]
    pub user_id: String,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    /// Command channel timeouts and stream discovery
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Execution engine limits
    #[serde(default)]
    pub engine: EngineSettings,

    /// Model endpoint for AI agent nodes
    #[serde(default)]
    pub ai: AiSettings,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Enable local HTTP server
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Enable MQTT transport; an in-memory bus is used otherwise
    #[serde(default = "default_true")]
    pub enable_mqtt: bool,

    /// Enable the recording listener
    #[serde(default = "default_true")]
    pub enable_recorder: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            user_id: String::new(),
            backend: BackendSettings::default(),
            mqtt_broker: MqttBrokerSettings::default(),
            channel: ChannelSettings::default(),
            engine: EngineSettings::default(),
            ai: AiSettings::default(),
            server: ServerSettings::default(),
            enable_server: true,
            enable_mqtt: true,
            enable_recorder: true,
        }
    }
}

impl Settings {
    /// Load settings from `file`, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, FlowError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json()
            .await
            .map_err(|e| FlowError::ConfigError(format!("{}: {}", file.path().display(), e)))
    }
}

/// Backend API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL for the backend API
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Bearer token for the backend API
    #[serde(default, skip_serializing)]
    pub api_token: Option<SecretString>,
}

fn default_backend_url() -> String {
    "http://localhost:8000/api".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_token: None,
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default)]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
}

fn default_mqtt_port() -> u16 {
    8883
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            tls: true,
            ca_cert_path: None,
            username: None,
            password: None,
        }
    }
}

/// Command channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default = "default_inspect_timeout_ms")]
    pub inspect_timeout_ms: u64,

    #[serde(default = "default_visual_inspect_timeout_ms")]
    pub visual_inspect_timeout_ms: u64,

    #[serde(default = "default_inspect_timeout_ms")]
    pub list_apps_timeout_ms: u64,

    #[serde(default = "default_inspect_timeout_ms")]
    pub start_stream_timeout_ms: u64,

    #[serde(default = "default_inspection_cache_ttl_ms")]
    pub inspection_cache_ttl_ms: u64,

    /// Ordered stream base URL templates; `{device_id}` is substituted
    #[serde(default = "default_stream_candidates")]
    pub stream_candidates: Vec<String>,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_frame_path")]
    pub frame_path: String,
}

fn default_inspect_timeout_ms() -> u64 {
    10_000
}

fn default_visual_inspect_timeout_ms() -> u64 {
    20_000
}

fn default_inspection_cache_ttl_ms() -> u64 {
    5_000
}

fn default_stream_candidates() -> Vec<String> {
    vec![
        "http://{device_id}.local:8080".to_string(),
        "http://{device_id}.local:8081".to_string(),
        "http://127.0.0.1:8080".to_string(),
    ]
}

fn default_probe_timeout_ms() -> u64 {
    1_500
}

fn default_frame_path() -> String {
    "/frame.jpg".to_string()
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            inspect_timeout_ms: default_inspect_timeout_ms(),
            visual_inspect_timeout_ms: default_visual_inspect_timeout_ms(),
            list_apps_timeout_ms: default_inspect_timeout_ms(),
            start_stream_timeout_ms: default_inspect_timeout_ms(),
            inspection_cache_ttl_ms: default_inspection_cache_ttl_ms(),
            stream_candidates: default_stream_candidates(),
            probe_timeout_ms: default_probe_timeout_ms(),
            frame_path: default_frame_path(),
        }
    }
}

/// Execution engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Completion timeout of a single gesture
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Node visits after which a run is aborted
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Iteration bound of custom loops without `iterations`
    #[serde(default = "default_custom_loop_limit")]
    pub custom_loop_limit: u32,
}

fn default_action_timeout_ms() -> u64 {
    15_000
}

fn default_max_steps() -> usize {
    10_000
}

fn default_custom_loop_limit() -> u32 {
    100
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            max_steps: default_max_steps(),
            custom_loop_limit: default_custom_loop_limit(),
        }
    }
}

/// Model endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_ai_model")]
    pub model: String,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            api_key: None,
            model: default_ai_model(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    7420
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
