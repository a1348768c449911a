//! Catalog aggregator - builds the unified catalog from every backend
//!
//! One refresh runs at a time. Backends are fetched concurrently; a failing
//! backend keeps its previous entries and the rest of the catalog still
//! advances to the next revision.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, watch};

use super::snapshot::{CatalogDiff, CatalogSnapshot, ToolDescriptor};
use crate::backend::RemoteTool;
use crate::error::{Result, RmfError};
use crate::events::{EventBroadcaster, EventDraft};
use crate::registry::{BackendRegistry, RegisteredBackend};
use crate::retry::RetryExecutor;
use crate::shutdown::ShutdownSignal;

/// Default number of backends fetched at once
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 8;

/// A backend whose listing could not be fetched during a refresh
#[derive(Debug, Clone, Serialize)]
pub struct BackendFailure {
    pub namespace: String,
    pub name: String,
    pub code: &'static str,
    pub message: String,
}

/// Result of one completed refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub revision: u64,
    pub diff: CatalogDiff,
    pub total: usize,
    pub failed: Vec<BackendFailure>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CatalogAggregator {
    registry: watch::Receiver<Arc<BackendRegistry>>,
    snapshot: Arc<watch::Sender<Arc<CatalogSnapshot>>>,
    executor: Arc<RetryExecutor>,
    events: EventBroadcaster,
    shutdown: ShutdownSignal,
    refresh_lock: Mutex<()>,
    concurrency: usize,
}

impl CatalogAggregator {
    pub fn new(
        registry: watch::Receiver<Arc<BackendRegistry>>,
        snapshot: Arc<watch::Sender<Arc<CatalogSnapshot>>>,
        executor: Arc<RetryExecutor>,
        events: EventBroadcaster,
        shutdown: ShutdownSignal,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            snapshot,
            executor,
            events,
            shutdown,
            refresh_lock: Mutex::new(()),
            concurrency: concurrency.max(1),
        }
    }

    /// Current snapshot, without refreshing
    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Rebuild and publish the catalog. Concurrent callers run one after
    /// another, each producing its own revision.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_cancellable().await
    }

    /// Refresh only if nothing has been published yet; otherwise return the
    /// current snapshot.
    pub async fn ensure_loaded(&self) -> Result<Arc<CatalogSnapshot>> {
        if self.current().revision() > 0 {
            return Ok(self.current());
        }
        let _guard = self.refresh_lock.lock().await;
        if self.current().revision() == 0 {
            self.refresh_cancellable().await?;
        }
        Ok(self.current())
    }

    async fn refresh_cancellable(&self) -> Result<RefreshReport> {
        if self.shutdown.is_triggered() {
            return Err(RmfError::Cancelled);
        }
        tokio::select! {
            report = self.rebuild() => Ok(report),
            _ = self.shutdown.triggered() => {
                tracing::warn!("Catalog refresh cancelled by shutdown");
                let revision = self.current().revision();
                self.events.publish(EventDraft::error("catalog", &RmfError::Cancelled, json!({"revision": revision})));
                Err(RmfError::Cancelled)
            }
        }
    }

    async fn rebuild(&self) -> RefreshReport {
        let registry = self.registry.borrow().clone();
        let previous = self.current();
        tracing::debug!(backends = registry.len(), revision = previous.revision(), "Refreshing catalog");

        let fetched: Vec<(RegisteredBackend, Result<Vec<RemoteTool>>)> = futures::stream::iter(registry.iter().cloned())
            .map(|backend| async move {
                let result = self.fetch(&backend).await;
                (backend, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut tools = BTreeMap::new();
        let mut failed = Vec::new();
        for (backend, result) in fetched {
            let namespace = backend.namespace();
            match result {
                Ok(listing) => {
                    let merged = merge_listing(&mut tools, namespace, listing);
                    tracing::debug!(namespace = %namespace, tools = merged, "Fetched backend tools");
                }
                Err(err) => {
                    let mut retained = 0;
                    for tool in previous.namespace_tools(namespace) {
                        tools.insert(tool.tool_id.clone(), tool.clone());
                        retained += 1;
                    }
                    tracing::warn!(
                        namespace = %namespace,
                        retained,
                        error = %err,
                        "Backend listing failed, keeping previous entries"
                    );
                    self.events.publish(EventDraft::error(
                        "catalog",
                        &err,
                        json!({"backend": backend.descriptor.name, "namespace": namespace}),
                    ));
                    failed.push(BackendFailure {
                        namespace: namespace.to_string(),
                        name: backend.descriptor.name.clone(),
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }
        failed.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        let snapshot = CatalogSnapshot::new(previous.revision() + 1, tools);
        let report = RefreshReport {
            revision: snapshot.revision(),
            diff: snapshot.diff(&previous),
            total: snapshot.len(),
            failed,
        };
        self.snapshot.send_replace(Arc::new(snapshot));
        self.events.publish(EventDraft::catalog_updated(&report));

        tracing::info!(
            revision = report.revision,
            total = report.total,
            added = report.diff.added,
            removed = report.diff.removed,
            changed = report.diff.changed,
            failed = report.failed.len(),
            "Catalog refreshed"
        );
        report
    }

    async fn fetch(&self, backend: &RegisteredBackend) -> Result<Vec<RemoteTool>> {
        let descriptor = &backend.descriptor;
        let client = &backend.client;
        self.executor
            .execute(&descriptor.retry, Some(descriptor.timeout), || client.list_tools())
            .await
            .map(|retried| retried.value)
            .map_err(|e| RmfError::from_retry(descriptor.namespace.clone(), e))
    }
}

/// Insert one backend's listing under its namespace; returns how many tools
/// were kept. The first occurrence of a duplicated local name wins.
fn merge_listing(tools: &mut BTreeMap<String, ToolDescriptor>, namespace: &str, listing: Vec<RemoteTool>) -> usize {
    let mut seen = HashSet::new();
    for remote in listing {
        if remote.name.trim().is_empty() {
            tracing::warn!(namespace = %namespace, "Skipping tool with empty name");
            continue;
        }
        if !seen.insert(remote.name.clone()) {
            tracing::warn!(namespace = %namespace, tool = %remote.name, "Duplicate tool name, keeping first");
            continue;
        }
        let descriptor = ToolDescriptor::from_remote(namespace, remote);
        tools.insert(descriptor.tool_id.clone(), descriptor);
    }
    seen.len()
}
