//! Unified tool catalog
//!
//! This module provides:
//! - CatalogSnapshot, an immutable generation of namespaced tools
//! - CatalogAggregator, which rebuilds and publishes snapshots

pub mod aggregator;
pub mod snapshot;

pub use aggregator::{BackendFailure, CatalogAggregator, DEFAULT_REFRESH_CONCURRENCY, RefreshReport};
pub use snapshot::{CatalogDiff, CatalogSnapshot, NAMESPACE_SEPARATOR, ToolDescriptor, split_tool_id, tool_id};
