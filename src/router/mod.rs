//! Call routing
//!
//! Resolves a namespaced tool id to its backend and forwards the call through
//! the retry executor. The backend is the authority on which tools exist, so
//! the cached catalog is never consulted here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{Semaphore, watch};

use crate::catalog::split_tool_id;
use crate::error::{Result, RmfError};
use crate::events::{EventBroadcaster, EventDraft};
use crate::registry::BackendRegistry;
use crate::retry::RetryExecutor;
use crate::shutdown::ShutdownSignal;

/// Default whole-call deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on in-flight calls
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

/// A completed tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    pub tool_id: String,
    pub namespace: String,
    /// Backend result, with any `content` envelope removed
    pub result: Value,
    pub latency: Duration,
    pub attempts: u32,
}

impl ToolCallOutcome {
    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

pub struct CallRouter {
    registry: watch::Receiver<Arc<BackendRegistry>>,
    executor: Arc<RetryExecutor>,
    events: EventBroadcaster,
    shutdown: ShutdownSignal,
    limiter: Semaphore,
    limit: usize,
    request_timeout: Duration,
}

impl CallRouter {
    pub fn new(
        registry: watch::Receiver<Arc<BackendRegistry>>,
        executor: Arc<RetryExecutor>,
        events: EventBroadcaster,
        shutdown: ShutdownSignal,
        max_concurrent_requests: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            events,
            shutdown,
            limiter: Semaphore::new(max_concurrent_requests),
            limit: max_concurrent_requests,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Free request slots right now
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Invoke with the default deadline
    pub async fn invoke(&self, tool_id: &str, arguments: Value) -> Result<ToolCallOutcome> {
        self.invoke_with_deadline(tool_id, arguments, self.request_timeout).await
    }

    /// Invoke a tool; every outcome is mirrored on the event stream
    pub async fn invoke_with_deadline(&self, tool_id: &str, arguments: Value, deadline: Duration) -> Result<ToolCallOutcome> {
        let started = Instant::now();
        let result = self.dispatch(tool_id, arguments, deadline, started).await;

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    tool_id = %tool_id,
                    latency_ms = outcome.latency_ms(),
                    attempts = outcome.attempts,
                    "Tool call succeeded"
                );
                self.events.publish(EventDraft::tool_called(outcome));
            }
            Err(err) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(tool_id = %tool_id, code = err.code(), error = %err, "Tool call failed");
                self.events.publish(EventDraft::error(
                    "router",
                    err,
                    json!({"tool_id": tool_id, "latency_ms": latency_ms}),
                ));
            }
        }
        result
    }

    async fn dispatch(&self, tool_id: &str, arguments: Value, deadline: Duration, started: Instant) -> Result<ToolCallOutcome> {
        let (namespace, local_name) = split_tool_id(tool_id)
            .ok_or_else(|| RmfError::NotFound(format!("tool id '{}' is not of the form namespace.tool", tool_id)))?;

        let registry = self.registry.borrow().clone();
        let backend = registry.lookup(namespace)?;

        let _permit = self
            .limiter
            .try_acquire()
            .map_err(|_| RmfError::Overloaded { limit: self.limit })?;

        if self.shutdown.is_triggered() {
            return Err(RmfError::Cancelled);
        }

        let descriptor = &backend.descriptor;
        let client = &backend.client;
        let call = self.executor.execute(&descriptor.retry, Some(descriptor.timeout), || {
            client.call_tool(local_name, arguments.clone())
        });

        let retried = tokio::select! {
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(Ok(retried)) => retried,
                Ok(Err(err)) => return Err(RmfError::from_retry(namespace, err)),
                Err(_) => {
                    return Err(RmfError::Timeout {
                        namespace: namespace.to_string(),
                        after: deadline,
                    });
                }
            },
            _ = self.shutdown.triggered() => return Err(RmfError::Cancelled),
        };

        Ok(ToolCallOutcome {
            tool_id: tool_id.to_string(),
            namespace: namespace.to_string(),
            result: retried.value,
            latency: started.elapsed(),
            attempts: retried.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::events::EventKind;
    use crate::registry::{BackendDescriptor, RetryPolicy};
    use crate::shutdown::ShutdownTrigger;
    use crate::testing::{MockBackend, MockConnector, RecordingSleeper};

    struct Fixture {
        router: CallRouter,
        events: EventBroadcaster,
        sleeper: Arc<RecordingSleeper>,
        shutdown: ShutdownTrigger,
    }

    fn fixture(backend: MockBackend, descriptor: BackendDescriptor, limit: usize) -> Fixture {
        let connector = MockConnector::new().with_backend(&descriptor.namespace, backend);
        let registry = BackendRegistry::load(vec![descriptor], &connector).unwrap();
        let (_registry_tx, registry_rx) = watch::channel(Arc::new(registry));
        let sleeper = Arc::new(RecordingSleeper::new());
        let events = EventBroadcaster::new(64);
        let shutdown = ShutdownTrigger::new();
        let router = CallRouter::new(
            registry_rx,
            Arc::new(RetryExecutor::with_sleeper(sleeper.clone())),
            events.clone(),
            shutdown.signal(),
            limit,
            DEFAULT_REQUEST_TIMEOUT,
        );
        Fixture {
            router,
            events,
            sleeper,
            shutdown,
        }
    }

    fn fetch() -> BackendDescriptor {
        BackendDescriptor::new("Fetch MCP", "http://localhost:8003", "fetch")
    }

    #[tokio::test]
    async fn test_invoke_forwards_local_name() {
        let backend = MockBackend::new().with_call_result("get_webpage", json!([{"type": "text", "text": "<html/>"}]));
        let fx = fixture(backend.clone(), fetch(), 4);
        let mut events = fx.events.subscribe();

        let outcome = fx
            .router
            .invoke("fetch.get_webpage", json!({"url": "https://example.com"}))
            .await
            .unwrap();

        assert_eq!(outcome.namespace, "fetch");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result[0]["text"], "<html/>");
        assert_eq!(backend.calls(), vec![("get_webpage".to_string(), json!({"url": "https://example.com"}))]);

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::ToolCalled);
        assert_eq!(event.payload["tool_id"], "fetch.get_webpage");
        assert_eq!(event.payload["success"], true);
    }

    #[tokio::test]
    async fn test_unknown_namespace_makes_no_backend_call() {
        let backend = MockBackend::new();
        let fx = fixture(backend.clone(), fetch(), 4);
        let mut events = fx.events.subscribe();

        let err = fx.router.invoke("weather.today", json!({})).await.unwrap_err();
        assert!(matches!(err, RmfError::NotFound(_)));
        assert_eq!(backend.call_count(), 0);

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.payload["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_tool_id() {
        let fx = fixture(MockBackend::new(), fetch(), 4);
        for id in ["fetch", ".get", "fetch."] {
            let err = fx.router.invoke(id, json!({})).await.unwrap_err();
            assert!(matches!(err, RmfError::NotFound(_)), "{}", id);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let backend = MockBackend::new().with_call_error(BackendError::Connection("refused".to_string()));
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5)).with_multiplier(2.0);
        let fx = fixture(backend.clone(), fetch().with_retry(policy), 4);

        let err = fx.router.invoke("fetch.get_webpage", json!({})).await.unwrap_err();
        assert!(matches!(err, RmfError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(backend.call_count(), 3);
        assert_eq!(fx.sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_permanent_failure_carries_status() {
        let backend = MockBackend::new().with_call_error(BackendError::Upstream {
            status: 404,
            message: "unknown tool".to_string(),
        });
        let fx = fixture(backend.clone(), fetch(), 4);

        let err = fx.router.invoke("fetch.missing", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM");
        assert_eq!(err.upstream_status(), Some(404));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let backend = MockBackend::new()
            .with_call_result("slow", json!("late"))
            .with_delay(Duration::from_secs(5));
        let fx = fixture(backend, fetch().with_timeout(Duration::from_secs(10)), 4);

        let err = fx
            .router
            .invoke_with_deadline("fetch.slow", json!({}), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RmfError::Timeout { .. }));
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_overloaded_when_no_slot_free() {
        let backend = MockBackend::new()
            .with_call_result("slow", json!("done"))
            .with_delay(Duration::from_millis(200));
        let fx = fixture(backend, fetch(), 1);

        let (first, second) = tokio::join!(fx.router.invoke("fetch.slow", json!({})), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fx.router.invoke("fetch.slow", json!({})).await
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(RmfError::Overloaded { limit: 1 })));
        assert_eq!(fx.router.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_call() {
        let backend = MockBackend::new()
            .with_call_result("slow", json!("late"))
            .with_delay(Duration::from_secs(5));
        let fx = fixture(backend, fetch().with_timeout(Duration::from_secs(10)), 4);

        let (result, _) = tokio::join!(fx.router.invoke("fetch.slow", json!({})), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fx.shutdown.trigger();
        });
        assert!(matches!(result, Err(RmfError::Cancelled)));
    }
}
