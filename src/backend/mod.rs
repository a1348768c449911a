//! Backend capability - the interface every remote tool server satisfies
//!
//! This module provides:
//! - Backend trait for listing and calling tools
//! - BackendError with transient/permanent classification
//! - HttpBackend, the reqwest implementation
//! - Connector trait that turns descriptors into live clients

pub mod http;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::registry::BackendDescriptor;

pub use http::{HttpBackend, HttpConnector};
pub use types::{RemoteTool, parse_tool_listing, unwrap_content};

/// A remote tool server
#[async_trait]
pub trait Backend: Send + Sync {
    /// Tools the backend currently exposes, by local name
    async fn list_tools(&self) -> std::result::Result<Vec<RemoteTool>, BackendError>;

    /// Invoke one tool by its local (un-namespaced) name
    async fn call_tool(&self, local_name: &str, arguments: Value) -> std::result::Result<Value, BackendError>;
}

/// Builds a client for a validated descriptor
pub trait Connector: Send + Sync {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>>;
}

/// Failure of a single backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Connection(_) => true,
            BackendError::Timeout(_) => true,
            BackendError::Upstream { status, .. } => *status >= 500,
            BackendError::InvalidResponse(_) => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Connection(_) | BackendError::Timeout(_) => "BACKEND_UNAVAILABLE",
            BackendError::Upstream { .. } => "UPSTREAM",
            BackendError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
