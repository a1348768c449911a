//! Unix socket front end for the gateway
//!
//! Each client gets its own task. Requests are answered in order on the
//! client's connection; after `events.subscribe` the same connection also
//! receives every published event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::events::{Event, EventSubscription};
use crate::gateway::Gateway;
use crate::ipc::messages::{CallParams, ErrorCode, IpcError, IpcEvent, IpcRequest, IpcResponse, Methods};
use crate::shutdown::ShutdownSignal;

/// Configuration for the IPC server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    pub socket_path: PathBuf,
    /// Connections beyond this are closed on accept
    pub max_clients: usize,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/rmf.sock"),
            max_clients: 16,
        }
    }
}

impl IpcServerConfig {
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }
}

#[derive(Debug, Default)]
struct ClientState {
    subscribed: bool,
}

type Clients = Arc<RwLock<HashMap<u64, ClientState>>>;

/// IPC server exposing one gateway
pub struct IpcServer {
    config: IpcServerConfig,
    gateway: Arc<Gateway>,
    /// Connected clients
    clients: Clients,
    next_client_id: AtomicU64,
}

impl IpcServer {
    pub fn new(gateway: Arc<Gateway>, config: IpcServerConfig) -> Self {
        Self {
            config,
            gateway,
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Clients that have called `events.subscribe`
    pub async fn subscriber_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.subscribed).count()
    }

    /// Accept clients until the gateway shuts down
    pub async fn run(&self) -> Result<()> {
        // Stale socket from an earlier run
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        let shutdown = self.gateway.shutdown_signal();
        tracing::info!(socket = %self.config.socket_path.display(), "IPC server listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let client_count = self.clients.read().await.len();
                            if client_count >= self.config.max_clients {
                                tracing::warn!(max_clients = self.config.max_clients, "Rejecting client, at capacity");
                                continue;
                            }

                            let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                            self.clients.write().await.insert(client_id, ClientState::default());

                            let gateway = Arc::clone(&self.gateway);
                            let clients = Arc::clone(&self.clients);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                handle_client(stream, client_id, gateway, Arc::clone(&clients), shutdown).await;
                                clients.write().await.remove(&client_id);
                                tracing::debug!(client_id, "Client disconnected");
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown.triggered() => {
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        tracing::info!("IPC server stopped");
        Ok(())
    }
}

/// Answer one request against the gateway
pub async fn handle_request(gateway: &Gateway, request: IpcRequest) -> IpcResponse {
    let id = request.id;
    match request.method.as_str() {
        Methods::PING => IpcResponse::success(id, json!({"pong": true})),
        Methods::TOOLS_LIST => match gateway.list_tools().await {
            Ok(snapshot) => IpcResponse::success(
                id,
                json!({
                    "revision": snapshot.revision(),
                    "tools": snapshot.tools().collect::<Vec<_>>(),
                }),
            ),
            Err(e) => IpcResponse::error(id, IpcError::from_gateway(&e)),
        },
        Methods::TOOLS_CALL => {
            let params: CallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => return IpcResponse::error(id, IpcError::invalid_params(format!("tools.call: {}", e))),
            };
            let outcome = match params.timeout_ms {
                Some(ms) => {
                    gateway
                        .call_tool_with_deadline(&params.tool, params.arguments, Duration::from_millis(ms))
                        .await
                }
                None => gateway.call_tool(&params.tool, params.arguments).await,
            };
            match outcome {
                Ok(outcome) => IpcResponse::success(
                    id,
                    json!({
                        "tool_id": outcome.tool_id,
                        "namespace": outcome.namespace,
                        "content": outcome.result,
                        "latency_ms": outcome.latency_ms(),
                        "attempts": outcome.attempts,
                    }),
                ),
                Err(e) => IpcResponse::error(id, IpcError::from_gateway(&e)),
            }
        }
        Methods::TOOLS_REFRESH => match gateway.refresh().await {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(value) => IpcResponse::success(id, value),
                Err(e) => IpcResponse::error(id, IpcError::new(ErrorCode::INTERNAL_ERROR, e.to_string())),
            },
            Err(e) => IpcResponse::error(id, IpcError::from_gateway(&e)),
        },
        Methods::EVENTS_SUBSCRIBE => IpcResponse::error(
            id,
            IpcError::new(ErrorCode::INVALID_REQUEST, "events.subscribe needs a socket connection"),
        ),
        other => IpcResponse::error(id, IpcError::method_not_found(other)),
    }
}

async fn write_json<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await
}

async fn next_event(subscription: &mut Option<EventSubscription>) -> Option<Event> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn handle_client(stream: UnixStream, client_id: u64, gateway: Arc<Gateway>, clients: Clients, shutdown: ShutdownSignal) {
    let (reader, mut writer) = stream.into_split();
    // next_line keeps partial input across select! cancellation
    let mut lines = BufReader::new(reader).lines();
    let mut subscription: Option<EventSubscription> = None;

    loop {
        tokio::select! {
            read_result = lines.next_line() => {
                let line = match read_result {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => break,
                };
                let request = line.trim();
                if request.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<IpcRequest>(request) {
                    Ok(request) if request.method == Methods::EVENTS_SUBSCRIBE => {
                        match gateway.subscribe_events() {
                            Ok(events) => {
                                subscription = Some(events);
                                if let Some(state) = clients.write().await.get_mut(&client_id) {
                                    state.subscribed = true;
                                }
                                IpcResponse::success(
                                    request.id,
                                    json!({"subscribed": true, "retry_ms": gateway.event_retry_ms()}),
                                )
                            }
                            Err(e) => IpcResponse::error(request.id, IpcError::from_gateway(&e)),
                        }
                    }
                    Ok(request) => handle_request(&gateway, request).await,
                    Err(e) => IpcResponse::error(0, IpcError::parse_error(format!("Parse error: {}", e))),
                };
                if write_json(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            // Forward events to this client once subscribed
            event = next_event(&mut subscription) => {
                match event {
                    Some(event) => {
                        if write_json(&mut writer, &IpcEvent::from(&event)).await.is_err() {
                            break;
                        }
                    }
                    None => subscription = None,
                }
            }
            _ = shutdown.triggered() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteTool;
    use crate::gateway::GatewaySettings;
    use crate::registry::BackendDescriptor;
    use crate::testing::{MockBackend, MockConnector};

    fn gateway() -> Gateway {
        let connector = MockConnector::new().with_backend(
            "fetch",
            MockBackend::new()
                .with_tools(vec![RemoteTool::new("get_webpage", "Fetch a page")])
                .with_call_result("get_webpage", json!({"content": "unused"})),
        );
        Gateway::new(
            vec![BackendDescriptor::new("Fetch MCP", "http://localhost:8003", "fetch")],
            Arc::new(connector),
            GatewaySettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = IpcServerConfig::default();
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/rmf.sock"));
    }

    #[test]
    fn test_server_config_builder() {
        let config = IpcServerConfig::default()
            .with_socket_path("/tmp/test.sock")
            .with_max_clients(32);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(config.max_clients, 32);
    }

    #[tokio::test]
    async fn test_server_client_count_initial() {
        let server = IpcServer::new(Arc::new(gateway()), IpcServerConfig::default());
        assert_eq!(server.client_count().await, 0);
        assert_eq!(server.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_handle_ping() {
        let response = handle_request(&gateway(), IpcRequest::no_params(1, Methods::PING)).await;
        assert_eq!(response.result.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_handle_tools_list_refreshes_lazily() {
        let response = handle_request(&gateway(), IpcRequest::no_params(2, Methods::TOOLS_LIST)).await;
        let result = response.result.unwrap();
        assert_eq!(result["revision"], 1);
        assert_eq!(result["tools"][0]["tool_id"], "fetch.get_webpage");
    }

    #[tokio::test]
    async fn test_handle_tools_call() {
        let request = IpcRequest::new(
            3,
            Methods::TOOLS_CALL,
            json!({"tool": "fetch.get_webpage", "arguments": {"url": "https://example.com"}}),
        );
        let response = handle_request(&gateway(), request).await;
        let result = response.result.unwrap();
        assert_eq!(result["content"], json!({"content": "unused"}));
        assert_eq!(result["attempts"], 1);
    }

    #[tokio::test]
    async fn test_handle_tools_call_bad_params() {
        let request = IpcRequest::new(4, Methods::TOOLS_CALL, json!({"arguments": {}}));
        let response = handle_request(&gateway(), request).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_tools_call_unknown_namespace() {
        let request = IpcRequest::new(5, Methods::TOOLS_CALL, json!({"tool": "weather.today"}));
        let error = handle_request(&gateway(), request).await.error.unwrap();
        assert_eq!(error.code, ErrorCode::NOT_FOUND);
        assert_eq!(error.data.unwrap()["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_handle_refresh() {
        let response = handle_request(&gateway(), IpcRequest::no_params(6, Methods::TOOLS_REFRESH)).await;
        let result = response.result.unwrap();
        assert_eq!(result["revision"], 1);
        assert_eq!(result["total"], 1);
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let response = handle_request(&gateway(), IpcRequest::no_params(7, "tools.delete")).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::METHOD_NOT_FOUND);
        assert!(error.message.contains("tools.delete"));
    }
}
