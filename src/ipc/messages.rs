//! Wire messages for the socket front end
//!
//! One JSON object per line. Requests carry an id echoed by the response;
//! pushed events carry none. Error codes borrow the JSON-RPC numbering for
//! protocol faults and use 1000+ for gateway failures.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RmfError;
use crate::events::Event;

/// Request sent from a client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Echoed back in the response
    pub id: u64,
    /// Method name (e.g., "tools.list", "tools.call").
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl IpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Request with an empty params object
    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Parameters of `tools.call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    /// Namespaced tool id, e.g. "fetch.get_webpage".
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    /// Per-call deadline overriding the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Response sent from the gateway to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl IpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method.into()))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// Map a gateway error, keeping its stable code and upstream status.
    pub fn from_gateway(err: &RmfError) -> Self {
        let code = match err {
            RmfError::NotFound(_) => ErrorCode::NOT_FOUND,
            RmfError::Permanent { .. } | RmfError::RetriesExhausted { .. } => ErrorCode::BACKEND_ERROR,
            RmfError::Timeout { .. } => ErrorCode::TIMEOUT,
            RmfError::Overloaded { .. } => ErrorCode::OVERLOADED,
            RmfError::Cancelled => ErrorCode::CANCELLED,
            RmfError::EventsDisabled => ErrorCode::EVENTS_DISABLED,
            RmfError::Config(_) | RmfError::Io(_) | RmfError::Json(_) => ErrorCode::INTERNAL_ERROR,
        };
        let mut data = json!({"code": err.code()});
        if let Some(status) = err.upstream_status() {
            data["upstream_status"] = json!(status);
        }
        if let Some(namespace) = err.namespace() {
            data["namespace"] = json!(namespace);
        }
        Self::with_data(code, err.to_string(), data)
    }
}

/// Numeric error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal gateway error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Unknown namespace or malformed tool id.
    pub const NOT_FOUND: i32 = 1001;
    /// Backend failed or rejected the call.
    pub const BACKEND_ERROR: i32 = 1002;
    /// Request deadline exceeded.
    pub const TIMEOUT: i32 = 1003;
    /// Too many concurrent requests.
    pub const OVERLOADED: i32 = 1004;
    /// Gateway is shutting down.
    pub const CANCELLED: i32 = 1005;
    /// Event stream switched off.
    pub const EVENTS_DISABLED: i32 = 1006;
}

/// Push event sent to subscribed clients (no request ID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcEvent {
    /// Event kind (e.g., "catalog_updated").
    pub event: String,
    pub data: Value,
}

impl IpcEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

impl From<&Event> for IpcEvent {
    fn from(event: &Event) -> Self {
        Self::new(
            event.kind.as_str(),
            json!({
                "sequence": event.sequence,
                "timestamp": event.timestamp,
                "payload": event.payload,
            }),
        )
    }
}

/// Method names understood by the server
pub struct Methods;

impl Methods {
    pub const PING: &'static str = "ping";
    pub const TOOLS_LIST: &'static str = "tools.list";
    pub const TOOLS_CALL: &'static str = "tools.call";
    pub const TOOLS_REFRESH: &'static str = "tools.refresh";
    pub const EVENTS_SUBSCRIBE: &'static str = "events.subscribe";
}
