//! IPC Layer - Unix socket serving layer for the gateway
//!
//! This module provides:
//! - Message types for requests, responses and pushed events
//! - Unix socket server dispatching to a Gateway

pub mod messages;
pub mod server;

pub use messages::{CallParams, ErrorCode, IpcError, IpcEvent, IpcRequest, IpcResponse, Methods};
pub use server::{IpcServer, IpcServerConfig, handle_request};
