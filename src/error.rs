//! Error types for RMF
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::retry::RetryError;

/// All error types surfaced by the gateway
#[derive(Debug, Error)]
pub enum RmfError {
    /// Invalid backend descriptor or server setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown namespace or malformed tool id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend rejected the request; retrying would not help
    #[error("Backend '{namespace}' rejected the request: {source}")]
    Permanent {
        namespace: String,
        #[source]
        source: BackendError,
    },

    /// Every attempt failed with a transient error
    #[error("Backend '{namespace}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        namespace: String,
        attempts: u32,
        #[source]
        last: BackendError,
    },

    /// Request deadline elapsed before the backend answered
    #[error("Call to '{namespace}' timed out after {after:?}")]
    Timeout { namespace: String, after: Duration },

    /// Shutdown interrupted the operation
    #[error("Operation cancelled by shutdown")]
    Cancelled,

    /// No free request slot
    #[error("Too many concurrent requests (limit {limit})")]
    Overloaded { limit: usize },

    /// Event stream is switched off in settings
    #[error("Event stream is disabled")]
    EventsDisabled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RmfError {
    /// Attach the backend namespace to an executor failure.
    pub fn from_retry(namespace: impl Into<String>, err: RetryError) -> Self {
        let namespace = namespace.into();
        match err {
            RetryError::Permanent { source, .. } => RmfError::Permanent { namespace, source },
            RetryError::Exhausted { attempts, last } => RmfError::RetriesExhausted {
                namespace,
                attempts,
                last,
            },
        }
    }

    /// Stable machine-readable code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            RmfError::Config(_) => "CONFIG",
            RmfError::NotFound(_) => "NOT_FOUND",
            RmfError::Permanent { source, .. } => source.code(),
            RmfError::RetriesExhausted { last, .. } => last.code(),
            RmfError::Timeout { .. } => "TIMEOUT",
            RmfError::Cancelled => "CANCELLED",
            RmfError::Overloaded { .. } => "OVERLOADED",
            RmfError::EventsDisabled => "EVENTS_DISABLED",
            RmfError::Io(_) => "IO",
            RmfError::Json(_) => "JSON",
        }
    }

    /// HTTP status reported by the backend, when the failure carries one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            RmfError::Permanent { source, .. } => source.status(),
            RmfError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Namespace of the backend involved, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            RmfError::Permanent { namespace, .. }
            | RmfError::RetriesExhausted { namespace, .. }
            | RmfError::Timeout { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

/// Result type alias for RMF operations
pub type Result<T> = std::result::Result<T, RmfError>;
