//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::channel::discovery::DiscoveryOptions;
use crate::channel::ChannelOptions;
use crate::engine::executor::ExecutorOptions;
use crate::engine::services::AiOptions;
use crate::mqtt::client::MqttAddress;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::mqtt;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// User whose response topic the command channel listens on
    pub user_id: String,

    /// Backend API base URL
    pub backend_base_url: String,

    /// Backend API bearer token
    pub backend_token: Option<SecretString>,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Connect to the MQTT broker; an in-memory bus is used otherwise
    pub enable_mqtt: bool,

    /// Enable recording listener
    pub enable_recorder: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// MQTT broker address
    pub mqtt_broker: MqttAddress,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    /// Command channel options
    pub channel: ChannelOptions,

    /// Execution engine options
    pub executor: ExecutorOptions,

    /// Model endpoint for AI agent nodes
    pub ai: AiOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            user_id: "local".to_string(),
            backend_base_url: "http://localhost:8000/api".to_string(),
            backend_token: None,
            storage: StorageLayout::default(),
            enable_server: true,
            enable_mqtt: true,
            enable_recorder: true,
            server: ServerOptions::default(),
            mqtt_broker: MqttAddress::default(),
            mqtt_worker: mqtt::Options::default(),
            channel: ChannelOptions::default(),
            executor: ExecutorOptions::default(),
            ai: AiOptions::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options described by a settings file
    pub fn from_settings(settings: &Settings, storage: StorageLayout) -> Self {
        let channel = &settings.channel;
        let defaults = Self::default();

        Self {
            user_id: if settings.user_id.is_empty() {
                defaults.user_id
            } else {
                settings.user_id.clone()
            },
            backend_base_url: settings.backend.base_url.clone(),
            backend_token: settings.backend.api_token.clone(),
            storage,
            enable_server: settings.enable_server,
            enable_mqtt: settings.enable_mqtt,
            enable_recorder: settings.enable_recorder,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            mqtt_broker: MqttAddress {
                host: settings.mqtt_broker.host.clone(),
                port: settings.mqtt_broker.port,
                use_tls: settings.mqtt_broker.tls,
                ca_cert_path: settings.mqtt_broker.ca_cert_path.clone(),
                username: settings.mqtt_broker.username.clone(),
                password: settings.mqtt_broker.password.clone(),
            },
            channel: ChannelOptions {
                inspect_timeout: Duration::from_millis(channel.inspect_timeout_ms),
                visual_inspect_timeout: Duration::from_millis(channel.visual_inspect_timeout_ms),
                list_apps_timeout: Duration::from_millis(channel.list_apps_timeout_ms),
                start_stream_timeout: Duration::from_millis(channel.start_stream_timeout_ms),
                inspection_cache_ttl: Duration::from_millis(channel.inspection_cache_ttl_ms),
                discovery: DiscoveryOptions {
                    candidates: channel.stream_candidates.clone(),
                    probe_timeout: Duration::from_millis(channel.probe_timeout_ms),
                    frame_path: channel.frame_path.clone(),
                },
            },
            executor: ExecutorOptions {
                action_timeout: Duration::from_millis(settings.engine.action_timeout_ms),
                max_steps: settings.engine.max_steps,
                custom_loop_limit: settings.engine.custom_loop_limit,
            },
            ai: AiOptions {
                base_url: settings.ai.base_url.clone(),
                api_key: settings.ai.api_key.clone(),
                model: settings.ai.model.clone(),
            },
            ..defaults
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7420,
        }
    }
}
