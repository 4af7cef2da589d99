//! MQTT transport

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::transport::{Message, Transport};
use crate::errors::FlowError;

const BUS_CAPACITY: usize = 256;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
            username: None,
            password: None,
        }
    }
}

/// Publishing half of a broker connection
pub struct MqttTransport {
    client: AsyncClient,
    bus: broadcast::Sender<Message>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

/// Event loop half of a broker connection; must be polled for anything to flow
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    bus: broadcast::Sender<Message>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

/// Create a broker connection for `client_id`
pub fn connect(
    address: &MqttAddress,
    client_id: &str,
) -> Result<(Arc<MqttTransport>, MqttConnection), FlowError> {
    if address.host.is_empty() {
        return Err(FlowError::ConfigError("MQTT host is not configured".to_string()));
    }

    let mut options = MqttOptions::new(client_id, &address.host, address.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = &address.username {
        let password = address
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();
        options.set_credentials(username, password);
    }

    if address.use_tls {
        use rumqttc::{TlsConfiguration, Transport as BrokerTransport};

        let client_config = tls_config(address)?;
        options.set_transport(BrokerTransport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(client_config),
        )));
    }

    let (client, eventloop) = AsyncClient::new(options, 10);
    let (bus, _) = broadcast::channel(BUS_CAPACITY);
    let subscriptions = Arc::new(Mutex::new(HashSet::new()));

    let transport = Arc::new(MqttTransport {
        client: client.clone(),
        bus: bus.clone(),
        subscriptions: subscriptions.clone(),
    });
    let connection = MqttConnection {
        client,
        eventloop,
        bus,
        subscriptions,
    };
    Ok((transport, connection))
}

fn tls_config(address: &MqttAddress) -> Result<rustls::ClientConfig, FlowError> {
    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = address.ca_cert_path {
        let ca_pem = std::fs::read(ca_path)
            .map_err(|e| FlowError::ConfigError(format!("Failed to read CA cert {ca_path}: {e}")))?;
        let mut cursor = std::io::Cursor::new(ca_pem);
        for cert in rustls_pemfile::certs(&mut cursor).flatten() {
            if let Err(e) = root_cert_store.add(cert) {
                warn!("Skipping CA certificate from {}: {}", ca_path, e);
            }
        }
    } else {
        for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
            let _ = root_cert_store.add(cert);
        }
    }

    if root_cert_store.is_empty() {
        return Err(FlowError::ConfigError(
            "no CA certificates available for MQTT TLS".to_string(),
        ));
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth())
}

fn transport_error(e: impl std::fmt::Display) -> FlowError {
    FlowError::TransportError(e.to_string())
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), FlowError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(transport_error)?;
        debug!("Published to: {}", topic);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), FlowError> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(transport_error)?;
        self.subscriptions
            .lock()
            .map_err(transport_error)?
            .insert(filter.to_string());
        info!("Subscribed to: {}", filter);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), FlowError> {
        self.subscriptions
            .lock()
            .map_err(transport_error)?
            .remove(filter);
        self.client
            .unsubscribe(filter)
            .await
            .map_err(transport_error)?;
        info!("Unsubscribed from: {}", filter);
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<Message> {
        self.bus.subscribe()
    }
}

impl MqttConnection {
    /// Drive the event loop once, forwarding any publish to the message bus
    pub async fn poll(&mut self) -> Result<Option<Message>, FlowError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message::new(publish.topic.clone(), publish.payload.to_vec());
                debug!("Received message on topic: {}", message.topic);
                // no receivers is fine, the message is simply not wanted
                let _ = self.bus.send(message.clone());
                Ok(Some(message))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                self.resubscribe();
                Ok(None)
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                Err(transport_error(e))
            }
        }
    }

    /// Subscriptions do not survive a new session
    fn resubscribe(&self) {
        let filters: Vec<String> = match self.subscriptions.lock() {
            Ok(subscriptions) => subscriptions.iter().cloned().collect(),
            Err(e) => {
                warn!("Subscription set unavailable: {}", e);
                return;
            }
        };
        for filter in filters {
            if let Err(e) = self.client.try_subscribe(&filter, QoS::AtLeastOnce) {
                warn!("Failed to resubscribe to {}: {}", filter, e);
            }
        }
    }

    /// Disconnect from broker
    pub async fn disconnect(&mut self) -> Result<(), FlowError> {
        self.client.disconnect().await.map_err(transport_error)?;
        info!("MQTT disconnected");
        Ok(())
    }
}
