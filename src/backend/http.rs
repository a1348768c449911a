//! HTTP backend client
//!
//! Talks to a remote tool server over plain JSON:
//! - `GET {base_url}/tools/list`
//! - `POST {base_url}/tools/call` with `{"tool": ..., "arguments": ...}`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};

use super::types::{RemoteTool, parse_tool_listing, unwrap_content};
use super::{Backend, BackendError, Connector};
use crate::error::{Result, RmfError};
use crate::registry::BackendDescriptor;

/// Longest upstream error body kept in a BackendError
const MAX_ERROR_BODY: usize = 512;

/// reqwest-based Backend
pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Build a client that sends the descriptor's headers on every request
    pub fn new(descriptor: &BackendDescriptor) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &descriptor.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                RmfError::Config(format!("backend '{}': invalid header name '{}': {}", descriptor.name, name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                RmfError::Config(format!("backend '{}': invalid value for header '{}': {}", descriptor.name, name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(descriptor.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RmfError::Config(format!("backend '{}': failed to create HTTP client: {}", descriptor.name, e)))?;

        Ok(Self {
            client,
            base_url: descriptor.base_url.trim_end_matches('/').to_string(),
            timeout: descriptor.timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BackendError::Connection(err.to_string())
        }
    }

    /// Read the body, turning non-2xx statuses into Upstream errors
    async fn read_body(&self, response: reqwest::Response) -> std::result::Result<String, BackendError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            let mut message = body;
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(BackendError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_tools(&self) -> std::result::Result<Vec<RemoteTool>, BackendError> {
        let response = self
            .client
            .get(self.endpoint("tools/list"))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let body = self.read_body(response).await?;
        parse_tool_listing(&body)
    }

    async fn call_tool(&self, local_name: &str, arguments: Value) -> std::result::Result<Value, BackendError> {
        let response = self
            .client
            .post(self.endpoint("tools/call"))
            .json(&json!({
                "tool": local_name,
                "arguments": arguments,
            }))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let body = self.read_body(response).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("tool result: {}", e)))?;
        Ok(unwrap_content(value))
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Connector producing HttpBackend clients
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(HttpBackend::new(descriptor)?))
    }
}
