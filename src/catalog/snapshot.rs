//! Immutable catalog snapshots
//!
//! A snapshot is never mutated after publication. Readers hold an `Arc` to
//! whichever generation they fetched.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::backend::RemoteTool;

/// Separator between namespace and local name in a tool id
pub const NAMESPACE_SEPARATOR: char = '.';

/// Build `{namespace}.{local_name}`
pub fn tool_id(namespace: &str, local_name: &str) -> String {
    format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, local_name)
}

/// Split a tool id on its first separator. Local names may contain dots.
pub fn split_tool_id(tool_id: &str) -> Option<(&str, &str)> {
    let (namespace, local_name) = tool_id.split_once(NAMESPACE_SEPARATOR)?;
    if namespace.is_empty() || local_name.is_empty() {
        return None;
    }
    Some((namespace, local_name))
}

/// A namespaced tool in the unified catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub tool_id: String,
    pub namespace: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn from_remote(namespace: &str, tool: RemoteTool) -> Self {
        Self {
            tool_id: tool_id(namespace, &tool.name),
            namespace: namespace.to_string(),
            local_name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

/// Counts of tool ids that differ between two snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogDiff {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0
    }
}

/// One generation of the unified catalog. Revision 0 is the empty
/// pre-refresh snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    revision: u64,
    tools: BTreeMap<String, ToolDescriptor>,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(revision: u64, tools: BTreeMap<String, ToolDescriptor>) -> Self {
        Self { revision, tools }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolDescriptor> {
        self.tools.get(tool_id)
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools ordered by tool id
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn tool_ids(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn namespace_tools<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a ToolDescriptor> + 'a {
        self.tools.values().filter(move |tool| tool.namespace == namespace)
    }

    /// Compare against an older snapshot
    pub fn diff(&self, previous: &CatalogSnapshot) -> CatalogDiff {
        let mut diff = CatalogDiff::default();
        for (id, tool) in &self.tools {
            match previous.tools.get(id) {
                None => diff.added += 1,
                Some(old) if old != tool => diff.changed += 1,
                Some(_) => {}
            }
        }
        diff.removed = previous.tools.keys().filter(|id| !self.tools.contains_key(*id)).count();
        diff
    }
}
