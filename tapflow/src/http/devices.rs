//! Device API client

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::FlowError;
use crate::http::client::HttpClient;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Answers whether a device is known to the backend
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn device_exists(&self, device_id: &str) -> Result<bool, FlowError>;
}

#[async_trait]
impl DeviceRegistry for HttpClient {
    async fn device_exists(&self, device_id: &str) -> Result<bool, FlowError> {
        let path = format!("/devices/{}", device_id);
        match self.get::<DeviceRecord>(&path).await {
            Ok(_) => Ok(true),
            Err(FlowError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
