//! Test doubles for backends, connectors and retry sleeps
//!
//! Built for unit tests and behind the `testing` feature, so integration
//! tests and downstream serving layers can drive a Gateway without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{Backend, BackendError, Connector, RemoteTool};
use crate::error::Result;
use crate::registry::BackendDescriptor;
use crate::retry::Sleeper;

#[derive(Debug, Default)]
struct MockState {
    tools: Vec<RemoteTool>,
    listing_error: Option<BackendError>,
    results: HashMap<String, Value>,
    call_error: Option<BackendError>,
    queued_call_errors: VecDeque<BackendError>,
    delay: Option<Duration>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    calls: Vec<(String, Value)>,
    list_count: usize,
}

/// Scripted in-memory backend. Clones share state, so a test can keep a
/// handle and change behaviour after the gateway has connected.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_tools(self, tools: Vec<RemoteTool>) -> Self {
        self.set_tools(tools);
        self
    }

    /// Result returned for calls to `local_name`
    pub fn with_call_result(self, local_name: impl Into<String>, result: Value) -> Self {
        self.state().results.insert(local_name.into(), result);
        self
    }

    /// Error returned for every call
    pub fn with_call_error(self, error: BackendError) -> Self {
        self.state().call_error = Some(error);
        self
    }

    /// Delay applied to every listing and call
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    /// Count listings in flight on `gauge`
    pub fn with_gauge(self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.state().gauge = Some(gauge);
        self
    }

    pub fn set_tools(&self, tools: Vec<RemoteTool>) {
        self.state().tools = tools;
    }

    pub fn fail_listing(&self, error: BackendError) {
        self.state().listing_error = Some(error);
    }

    pub fn recover_listing(&self) {
        self.state().listing_error = None;
    }

    /// Error returned by the next call only; queued errors are used in order
    pub fn queue_call_error(&self, error: BackendError) {
        self.state().queued_call_errors.push_back(error);
    }

    /// Every call received, as (local name, arguments)
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn list_count(&self) -> usize {
        self.state().list_count
    }

    fn delay(&self) -> Option<Duration> {
        self.state().delay
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_tools(&self) -> std::result::Result<Vec<RemoteTool>, BackendError> {
        let gauge = {
            let mut state = self.state();
            state.list_count += 1;
            state.gauge.clone()
        };
        if let Some(gauge) = &gauge {
            gauge.enter();
        }
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        if let Some(gauge) = &gauge {
            gauge.exit();
        }
        let state = self.state();
        match &state.listing_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.tools.clone()),
        }
    }

    async fn call_tool(&self, local_name: &str, arguments: Value) -> std::result::Result<Value, BackendError> {
        self.state().calls.push((local_name.to_string(), arguments));
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(error) = state.queued_call_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.call_error {
            return Err(error.clone());
        }
        state.results.get(local_name).cloned().ok_or_else(|| BackendError::Upstream {
            status: 404,
            message: format!("unknown tool '{}'", local_name),
        })
    }
}

/// Tracks how many operations run at once and the highest count seen
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Connector handing out MockBackends by namespace. Namespaces without a
/// scripted backend get an empty one.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    backends: Arc<Mutex<HashMap<String, MockBackend>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(self, namespace: impl Into<String>, backend: MockBackend) -> Self {
        self.insert(namespace, backend);
        self
    }

    pub fn insert(&self, namespace: impl Into<String>, backend: MockBackend) {
        self.backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.into(), backend);
    }

    /// The backend serving `namespace`, if one was scripted or connected
    pub fn backend(&self, namespace: &str) -> Option<MockBackend> {
        self.backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let backend = self
            .backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(descriptor.namespace.clone())
            .or_default()
            .clone();
        Ok(Arc::new(backend))
    }
}

/// Sleeper that records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_backend_scripted_results() {
        let backend = MockBackend::new()
            .with_tools(vec![RemoteTool::new("echo", "")])
            .with_call_result("echo", json!({"ok": true}));

        assert_eq!(backend.list_tools().await.unwrap().len(), 1);
        assert_eq!(backend.call_tool("echo", json!({})).await.unwrap(), json!({"ok": true}));
        let missing = backend.call_tool("nope", json!({})).await.unwrap_err();
        assert_eq!(missing.status(), Some(404));
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.list_count(), 1);
    }

    #[tokio::test]
    async fn test_queued_errors_come_first() {
        let backend = MockBackend::new().with_call_result("echo", json!(1));
        backend.queue_call_error(BackendError::Connection("blip".to_string()));

        assert!(backend.call_tool("echo", json!({})).await.is_err());
        assert_eq!(backend.call_tool("echo", json!({})).await.unwrap(), json!(1));
    }

    #[test]
    fn test_connector_shares_scripted_backend() {
        let scripted = MockBackend::new().with_tools(vec![RemoteTool::new("a", "")]);
        let connector = MockConnector::new().with_backend("fetch", scripted.clone());
        let descriptor = BackendDescriptor::new("Fetch", "http://fetch", "fetch");

        connector.connect(&descriptor).unwrap();
        scripted.set_tools(vec![]);
        assert!(connector.backend("fetch").unwrap().state().tools.is_empty());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_gauge_tracks_overlapping_listings() {
        let gauge = Arc::new(ConcurrencyGauge::new());
        let a = MockBackend::new().with_delay(Duration::from_millis(20)).with_gauge(Arc::clone(&gauge));
        let b = MockBackend::new().with_delay(Duration::from_millis(20)).with_gauge(Arc::clone(&gauge));

        let (ra, rb) = tokio::join!(a.list_tools(), b.list_tools());
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(gauge.peak(), 2);
        assert_eq!(gauge.current(), 0);
    }

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(3)).await;
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(3)]);
    }
}
