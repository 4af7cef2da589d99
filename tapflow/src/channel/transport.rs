//! Pub/sub transport abstraction

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::channel::topics::Topics;
use crate::errors::FlowError;

const BUS_CAPACITY: usize = 256;

/// Message received from or sent to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Parse payload as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, FlowError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Fan-out pub/sub transport.
///
/// Delivery is at-most-once; every subscriber of [`Transport::messages`]
/// sees every message on every subscribed topic.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), FlowError>;

    async fn subscribe(&self, filter: &str) -> Result<(), FlowError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), FlowError>;

    /// Receiver for inbound messages on subscribed topics
    fn messages(&self) -> broadcast::Receiver<Message>;
}

/// Serialize `value` and publish it on `topic`
pub async fn publish_json<T: Serialize + ?Sized>(
    transport: &dyn Transport,
    topic: &str,
    value: &T,
) -> Result<(), FlowError> {
    let payload = serde_json::to_vec(value)?;
    transport.publish(topic, payload).await
}

// =============================== IN-MEMORY ================================== //

/// In-process broker used by tests and offline mode.
///
/// Published messages are looped back to local subscribers and copied to an
/// outbound bus, so a test can play the device agent by reading
/// [`MemoryTransport::outbound`] and answering with [`MemoryTransport::inject`].
pub struct MemoryTransport {
    inbound: broadcast::Sender<Message>,
    outbound: broadcast::Sender<Message>,
    subscriptions: Mutex<HashSet<String>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(BUS_CAPACITY);
        let (outbound, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inbound,
            outbound,
            subscriptions: Mutex::new(HashSet::new()),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Everything published through this transport
    pub fn outbound(&self) -> broadcast::Receiver<Message> {
        self.outbound.subscribe()
    }

    /// Deliver a message as if it came from the broker
    pub fn inject(&self, topic: &str, payload: Vec<u8>) {
        self.deliver(Message::new(topic, payload));
    }

    pub fn inject_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<(), FlowError> {
        let payload = serde_json::to_vec(value)?;
        self.inject(topic, payload);
        Ok(())
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|subs| subs.contains(filter))
            .unwrap_or(false)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    fn deliver(&self, message: Message) {
        let subscribed = self
            .subscriptions
            .lock()
            .map(|subs| subs.iter().any(|f| Topics::matches(f, &message.topic)))
            .unwrap_or(false);
        if subscribed {
            // no receivers is not an error for a broker
            let _ = self.inbound.send(message);
        } else {
            debug!("Dropping message on unsubscribed topic: {}", message.topic);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), FlowError> {
        let message = Message::new(topic, payload);
        let _ = self.outbound.send(message.clone());
        self.deliver(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), FlowError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .map_err(|e| FlowError::TransportError(e.to_string()))?
            .insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), FlowError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .map_err(|e| FlowError::TransportError(e.to_string()))?
            .remove(filter);
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<Message> {
        self.inbound.subscribe()
    }
}
