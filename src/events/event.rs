//! Event records published by the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::catalog::RefreshReport;
use crate::error::RmfError;
use crate::router::ToolCallOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CatalogUpdated,
    ToolCalled,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CatalogUpdated => "catalog_updated",
            EventKind::ToolCalled => "tool_called",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event; `sequence` starts at 1 and increases by one per publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// An event before the broadcaster stamps it with a sequence and time
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub kind: EventKind,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn catalog_updated(report: &RefreshReport) -> Self {
        let failed: Vec<&str> = report.failed.iter().map(|f| f.namespace.as_str()).collect();
        Self::new(
            EventKind::CatalogUpdated,
            json!({
                "revision": report.revision,
                "added": report.diff.added,
                "removed": report.diff.removed,
                "changed": report.diff.changed,
                "total": report.total,
                "failed_backends": failed,
            }),
        )
    }

    pub fn tool_called(outcome: &ToolCallOutcome) -> Self {
        Self::new(
            EventKind::ToolCalled,
            json!({
                "tool_id": outcome.tool_id,
                "namespace": outcome.namespace,
                "latency_ms": outcome.latency_ms(),
                "success": true,
                "attempts": outcome.attempts,
            }),
        )
    }

    /// Error event; `context` is merged into the payload (e.g. tool_id, backend)
    pub fn error(source: &str, err: &RmfError, context: Value) -> Self {
        let mut payload = json!({
            "source": source,
            "code": err.code(),
            "message": err.to_string(),
        });
        if let Some(status) = err.upstream_status() {
            payload["upstream_status"] = json!(status);
        }
        if let (Value::Object(target), Value::Object(extra)) = (&mut payload, context) {
            target.extend(extra);
        }
        Self::new(EventKind::Error, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(serde_json::to_string(&EventKind::CatalogUpdated).unwrap(), "\"catalog_updated\"");
        assert_eq!(EventKind::ToolCalled.to_string(), "tool_called");
    }

    #[test]
    fn test_error_draft_merges_context() {
        let err = RmfError::NotFound("namespace 'weather'".to_string());
        let draft = EventDraft::error("router", &err, json!({"tool_id": "weather.today"}));
        assert_eq!(draft.kind, EventKind::Error);
        assert_eq!(draft.payload["code"], "NOT_FOUND");
        assert_eq!(draft.payload["tool_id"], "weather.today");
        assert_eq!(draft.payload["source"], "router");
        assert!(draft.payload.get("upstream_status").is_none());
    }

    #[test]
    fn test_event_roundtrip_keeps_kind() {
        let event = Event {
            sequence: 4,
            kind: EventKind::Error,
            payload: json!({"code": "TIMEOUT"}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"error\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
