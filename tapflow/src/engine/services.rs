//! Non-device collaborators used by data-producing nodes

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::FlowError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

/// Data sources behind DataSource, FileInput, Webhook and AiAgent nodes
#[async_trait]
pub trait ExternalServices: Send + Sync {
    async fn fetch_collection(&self, collection_id: &str) -> Result<Value, FlowError>;

    async fn resolve_file(&self, path: &str) -> Result<Value, FlowError>;

    async fn call_webhook(&self, request: &WebhookRequest) -> Result<Value, FlowError>;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, FlowError>;
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone)]
pub struct AiOptions {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
}

impl Default for AiOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Backend, plain HTTP and model endpoints
pub struct HttpServices {
    backend: HttpClient,
    client: reqwest::Client,
    ai: AiOptions,
    files_root: PathBuf,
}

impl HttpServices {
    pub fn new(backend: HttpClient, ai: AiOptions, files_root: PathBuf) -> Self {
        Self {
            backend,
            client: reqwest::Client::new(),
            ai,
            files_root,
        }
    }
}

#[async_trait]
impl ExternalServices for HttpServices {
    async fn fetch_collection(&self, collection_id: &str) -> Result<Value, FlowError> {
        self.backend.get_collection(collection_id).await
    }

    async fn resolve_file(&self, path: &str) -> Result<Value, FlowError> {
        let candidate = PathBuf::from(path);
        let resolved = if candidate.is_absolute() {
            candidate
        } else {
            self.files_root.join(candidate)
        };

        let file = File::new(&resolved);
        if !file.exists().await {
            return Err(FlowError::NotFound(format!("file {}", resolved.display())));
        }
        Ok(Value::String(resolved.display().to_string()))
    }

    async fn call_webhook(&self, request: &WebhookRequest) -> Result<Value, FlowError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| FlowError::ValidationError(format!("invalid method: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FlowError::ValidationError(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FlowError::ValidationError(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        debug!("{} {}", method, request.url);
        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(FlowError::RemoteError(format!(
                "webhook {} answered {}: {}",
                request.url, status, text
            )));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, FlowError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let payload = json!({
            "model": request.model.clone().unwrap_or_else(|| self.ai.model.clone()),
            "messages": messages,
        });

        let url = format!("{}/chat/completions", self.ai.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&payload);
        if let Some(key) = &self.ai.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(FlowError::RemoteError(format!("completion failed: {} - {}", status, body)));
        }

        body.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| FlowError::RemoteError("completion response has no content".to_string()))
    }
}
