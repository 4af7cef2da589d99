//! Data collection API client

use serde::Deserialize;
use serde_json::Value;

use crate::errors::FlowError;
use crate::http::client::HttpClient;

#[derive(Debug, Clone, Deserialize)]
struct CollectionResponse {
    #[serde(default)]
    items: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
}

impl HttpClient {
    /// Fetch the rows of a data collection
    pub async fn get_collection(&self, collection_id: &str) -> Result<Value, FlowError> {
        let path = format!("/data-collections/{}", collection_id);
        let response: Value = self.get(&path).await?;

        // bare arrays and {items} / {data} envelopes are all in use
        if response.is_array() {
            return Ok(response);
        }
        let envelope: CollectionResponse = serde_json::from_value(response)?;
        envelope
            .items
            .or(envelope.data)
            .ok_or_else(|| FlowError::RemoteError(format!("collection {} has no items", collection_id)))
    }
}
