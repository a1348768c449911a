//! Gateway - the context object a serving layer talks to
//!
//! Owns the registry and catalog cells, the event broadcaster and the
//! shutdown trigger. Registry and snapshot are `Arc`s behind `watch`
//! channels: readers take the current generation, writers swap in a new one.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::Connector;
use crate::catalog::{CatalogAggregator, CatalogSnapshot, DEFAULT_REFRESH_CONCURRENCY, RefreshReport};
use crate::error::{Result, RmfError};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventBroadcaster, EventSubscription};
use crate::registry::{BackendDescriptor, BackendRegistry};
use crate::retry::RetryExecutor;
use crate::router::{CallRouter, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_REQUEST_TIMEOUT, ToolCallOutcome};
use crate::shutdown::{ShutdownSignal, ShutdownTrigger};

/// Shortest period accepted by the refresh loop
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime settings consumed by the gateway core
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub events_enabled: bool,
    /// Reconnect hint handed to event subscribers, in milliseconds
    pub event_retry_ms: u64,
    pub event_capacity: usize,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub refresh_concurrency: usize,
    pub refresh_interval: Option<Duration>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            events_enabled: true,
            event_retry_ms: 3000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            refresh_interval: None,
        }
    }
}

impl GatewaySettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(RmfError::Config("max_concurrent_requests must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(RmfError::Config("request_timeout must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(RmfError::Config("event_capacity must be at least 1".to_string()));
        }
        if self.refresh_concurrency == 0 {
            return Err(RmfError::Config("refresh_concurrency must be at least 1".to_string()));
        }
        if self.refresh_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(RmfError::Config("refresh_interval must be positive".to_string()));
        }
        Ok(())
    }
}

pub struct Gateway {
    settings: GatewaySettings,
    connector: Arc<dyn Connector>,
    registry: watch::Sender<Arc<BackendRegistry>>,
    aggregator: Arc<CatalogAggregator>,
    router: CallRouter,
    events: EventBroadcaster,
    shutdown: ShutdownTrigger,
}

impl Gateway {
    /// Build a gateway over the given backends. Nothing is fetched until the
    /// first refresh or `list_tools`.
    pub fn new(descriptors: Vec<BackendDescriptor>, connector: Arc<dyn Connector>, settings: GatewaySettings) -> Result<Self> {
        Self::with_executor(descriptors, connector, settings, RetryExecutor::new())
    }

    /// Same as `new`, with a caller-supplied retry executor
    pub fn with_executor(
        descriptors: Vec<BackendDescriptor>,
        connector: Arc<dyn Connector>,
        settings: GatewaySettings,
        executor: RetryExecutor,
    ) -> Result<Self> {
        settings.validate()?;
        let registry = BackendRegistry::load(descriptors, connector.as_ref())?;
        tracing::info!(backends = registry.len(), namespaces = ?registry.namespaces(), "Gateway registry loaded");

        let (registry_tx, registry_rx) = watch::channel(Arc::new(registry));
        let (snapshot_tx, _) = watch::channel(Arc::new(CatalogSnapshot::empty()));
        let executor = Arc::new(executor);
        let events = EventBroadcaster::new(settings.event_capacity);
        let shutdown = ShutdownTrigger::new();

        let aggregator = CatalogAggregator::new(
            registry_rx.clone(),
            Arc::new(snapshot_tx),
            Arc::clone(&executor),
            events.clone(),
            shutdown.signal(),
            settings.refresh_concurrency,
        );
        let router = CallRouter::new(
            registry_rx,
            executor,
            events.clone(),
            shutdown.signal(),
            settings.max_concurrent_requests,
            settings.request_timeout,
        );

        Ok(Self {
            settings,
            connector,
            registry: registry_tx,
            aggregator: Arc::new(aggregator),
            router,
            events,
            shutdown,
        })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Current catalog, refreshing first if nothing has been published yet
    pub async fn list_tools(&self) -> Result<Arc<CatalogSnapshot>> {
        self.aggregator.ensure_loaded().await
    }

    /// Current catalog without any refresh; revision 0 means never refreshed
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.aggregator.current()
    }

    pub async fn call_tool(&self, tool_id: &str, arguments: Value) -> Result<ToolCallOutcome> {
        self.router.invoke(tool_id, arguments).await
    }

    pub async fn call_tool_with_deadline(&self, tool_id: &str, arguments: Value, deadline: Duration) -> Result<ToolCallOutcome> {
        self.router.invoke_with_deadline(tool_id, arguments, deadline).await
    }

    pub fn subscribe_events(&self) -> Result<EventSubscription> {
        if !self.settings.events_enabled {
            return Err(RmfError::EventsDisabled);
        }
        Ok(self.events.subscribe())
    }

    /// Reconnect hint for event stream clients
    pub fn event_retry_ms(&self) -> u64 {
        self.settings.event_retry_ms
    }

    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.aggregator.refresh().await
    }

    /// Replace the registry. On error the current registry stays in place.
    /// The catalog picks up the change on the next refresh.
    pub fn reload(&self, descriptors: Vec<BackendDescriptor>) -> Result<()> {
        let registry = BackendRegistry::load(descriptors, self.connector.as_ref())?;
        tracing::info!(backends = registry.len(), namespaces = ?registry.namespaces(), "Gateway registry reloaded");
        self.registry.send_replace(Arc::new(registry));
        Ok(())
    }

    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.registry.borrow().clone()
    }

    /// Refresh now and then every `period` until shutdown
    pub fn spawn_refresh_loop(&self, period: Duration) -> JoinHandle<()> {
        let aggregator = Arc::clone(&self.aggregator);
        let shutdown = self.shutdown.signal();
        let period = period.max(MIN_REFRESH_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match aggregator.refresh().await {
                            Ok(report) if !report.is_complete() => {
                                tracing::warn!(revision = report.revision, failed = report.failed.len(), "Periodic refresh incomplete");
                            }
                            Ok(_) => {}
                            Err(RmfError::Cancelled) => break,
                            Err(e) => tracing::error!(error = %e, "Periodic refresh failed"),
                        }
                    }
                    _ = shutdown.triggered() => break,
                }
            }
            tracing::info!("Refresh loop stopped");
        })
    }

    /// Stop refresh loops and abort in-flight work. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_triggered() {
            tracing::info!("Gateway shutting down");
        }
        self.shutdown.trigger();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("settings", &self.settings)
            .field("revision", &self.snapshot().revision())
            .field("backends", &self.registry().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    #[test]
    fn test_settings_defaults() {
        let settings = GatewaySettings::default();
        assert!(settings.events_enabled);
        assert_eq!(settings.event_retry_ms, 3000);
        assert_eq!(settings.max_concurrent_requests, 10);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = GatewaySettings {
            max_concurrent_requests: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(RmfError::Config(_))));

        let settings = GatewaySettings {
            refresh_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_events_disabled() {
        let settings = GatewaySettings {
            events_enabled: false,
            ..Default::default()
        };
        let gateway = Gateway::new(vec![], Arc::new(MockConnector::new()), settings).unwrap();
        assert!(matches!(gateway.subscribe_events(), Err(RmfError::EventsDisabled)));
    }

    #[test]
    fn test_reload_keeps_registry_on_error() {
        let gateway = Gateway::new(
            vec![BackendDescriptor::new("Fetch", "http://fetch", "fetch")],
            Arc::new(MockConnector::new()),
            GatewaySettings::default(),
        )
        .unwrap();

        let bad = vec![
            BackendDescriptor::new("A", "http://a", "dup"),
            BackendDescriptor::new("B", "http://b", "dup"),
        ];
        assert!(gateway.reload(bad).is_err());
        assert_eq!(gateway.registry().namespaces(), vec!["fetch"]);

        gateway
            .reload(vec![BackendDescriptor::new("Search", "http://search", "search")])
            .unwrap();
        assert_eq!(gateway.registry().namespaces(), vec!["search"]);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let gateway = Gateway::new(vec![], Arc::new(MockConnector::new()), GatewaySettings::default()).unwrap();
        gateway.shutdown();
        gateway.shutdown();
        assert!(gateway.is_shutting_down());
        assert!(matches!(gateway.refresh().await, Err(RmfError::Cancelled)));
    }
}
