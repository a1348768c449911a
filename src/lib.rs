//! RMF - Remote MCP federation
//!
//! Aggregates the tools of many remote tool servers into one namespaced
//! catalog and routes calls to the right backend, with retries, deadlines
//! and an event stream describing what happened.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ipc;
pub mod registry;
pub mod retry;
pub mod router;
pub mod shutdown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Result, RmfError};
pub use gateway::{Gateway, GatewaySettings};
