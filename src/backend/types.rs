//! Wire types exchanged with backends
//!
//! A backend lists tools either as `{"tools": [...]}` or as a bare array, and
//! may wrap call results in a `{"content": ...}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BackendError;

/// A tool as advertised by one backend, keyed by its local name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    /// Local tool name (e.g., "get_webpage")
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool arguments
    #[serde(default = "empty_schema", alias = "parameters")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl RemoteTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_schema(),
        }
    }

    /// Set the argument schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolListing {
    Wrapped { tools: Vec<RemoteTool> },
    Bare(Vec<RemoteTool>),
}

/// Decode a `tools/list` response body
pub fn parse_tool_listing(body: &str) -> Result<Vec<RemoteTool>, BackendError> {
    match serde_json::from_str::<ToolListing>(body) {
        Ok(ToolListing::Wrapped { tools }) | Ok(ToolListing::Bare(tools)) => Ok(tools),
        Err(e) => Err(BackendError::InvalidResponse(format!("tool listing: {}", e))),
    }
}

/// Strip a `{"content": ...}` envelope from a call result
pub fn unwrap_content(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("content") => map.remove("content").unwrap_or(Value::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_listing() {
        let body = r#"{"tools": [{"name": "get_webpage", "description": "Fetch a page"}]}"#;
        let tools = parse_tool_listing(body).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_webpage");
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    #[test]
    fn test_parse_bare_listing() {
        let body = r#"[{"name": "search", "description": "Search", "input_schema": {"type": "object", "required": ["q"]}}]"#;
        let tools = parse_tool_listing(body).unwrap();
        assert_eq!(tools[0].input_schema["required"][0], "q");
    }

    #[test]
    fn test_parameters_alias() {
        let body = r#"{"tools": [{"name": "get_webpage", "parameters": {"type": "object", "properties": {"url": {"type": "string"}}}}]}"#;
        let tools = parse_tool_listing(body).unwrap();
        assert_eq!(tools[0].input_schema["properties"]["url"]["type"], "string");
        assert_eq!(tools[0].description, "");
    }

    #[test]
    fn test_parse_invalid_listing() {
        let err = parse_tool_listing(r#"{"items": 3}"#).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unwrap_content_envelope() {
        let content = json!([{"type": "text", "text": "<html/>"}]);
        assert_eq!(unwrap_content(json!({"content": content.clone()})), content);
    }

    #[test]
    fn test_unwrap_content_passthrough() {
        assert_eq!(unwrap_content(json!({"text": "hi"})), json!({"text": "hi"}));
        assert_eq!(unwrap_content(json!("plain")), json!("plain"));
    }

    #[test]
    fn test_remote_tool_with_schema() {
        let tool = RemoteTool::new("echo", "Echo input").with_schema(json!({"type": "string"}));
        assert_eq!(tool.input_schema, json!({"type": "string"}));
    }
}
