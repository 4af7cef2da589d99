//! MQTT broker connection

pub mod client;

pub use client::{connect, MqttAddress, MqttConnection, MqttTransport};
