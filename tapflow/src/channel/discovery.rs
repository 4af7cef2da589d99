//! Stream endpoint discovery

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::FlowError;

/// Discovery state of a device's screenshot stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Idle,
    Discovering,
    Active {
        #[serde(rename = "baseUrl")]
        base_url: String,
    },
    /// Every candidate failed; a new `start_stream` may be attempted
    NotFound,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Ordered base URL templates; `{device_id}` is substituted
    pub candidates: Vec<String>,

    /// Timeout of a single-frame probe
    pub probe_timeout: Duration,

    /// Path fetched on each candidate
    pub frame_path: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            candidates: vec![
                "http://{device_id}.local:8080".to_string(),
                "http://{device_id}.local:8081".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            probe_timeout: Duration::from_millis(1500),
            frame_path: "/frame.jpg".to_string(),
        }
    }
}

impl DiscoveryOptions {
    pub fn candidate_urls(&self, device_id: &str) -> Vec<String> {
        self.candidates
            .iter()
            .map(|c| c.replace("{device_id}", device_id))
            .collect()
    }
}

/// Checks whether a stream server answers at a base URL
#[async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, base_url: &str, timeout: Duration) -> Result<(), FlowError>;
}

/// Fetches a single frame over HTTP
pub struct HttpStreamProber {
    client: reqwest::Client,
    frame_path: String,
}

impl HttpStreamProber {
    pub fn new(frame_path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            frame_path: frame_path.into(),
        }
    }
}

#[async_trait]
impl StreamProber for HttpStreamProber {
    async fn probe(&self, base_url: &str, timeout: Duration) -> Result<(), FlowError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.frame_path);
        let response = self.client.get(&url).timeout(timeout).send().await?;
        if !response.status().is_success() {
            return Err(FlowError::NotFound(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }
        let frame = response.bytes().await?;
        if frame.is_empty() {
            return Err(FlowError::NotFound(format!("{} returned an empty frame", url)));
        }
        Ok(())
    }
}

/// Probe `candidates` in order and return the first that answers
pub async fn discover(
    prober: &dyn StreamProber,
    candidates: &[String],
    probe_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, FlowError> {
    for candidate in candidates {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FlowError::Cancelled("stream discovery cancelled".to_string()));
            }
            outcome = tokio::time::timeout(probe_timeout, prober.probe(candidate, probe_timeout)) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                info!("Stream endpoint found at {}", candidate);
                return Ok(candidate.clone());
            }
            Ok(Err(e)) => debug!("Stream probe {} failed: {}", candidate, e),
            Err(_) => debug!("Stream probe {} timed out", candidate),
        }
    }

    Err(FlowError::NotFound(format!(
        "no stream endpoint answered among {} candidates",
        candidates.len()
    )))
}
