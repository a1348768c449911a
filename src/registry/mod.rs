//! Backend registry - validated descriptors paired with live clients
//!
//! A registry is immutable once loaded. Reloading builds a new one and the
//! gateway swaps it in whole.

pub mod descriptor;

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{Backend, Connector};
use crate::error::{Result, RmfError};

pub use descriptor::{BackendDescriptor, DEFAULT_BACKEND_TIMEOUT, RetryPolicy};

/// A descriptor together with the client built for it
#[derive(Clone)]
pub struct RegisteredBackend {
    pub descriptor: BackendDescriptor,
    pub client: Arc<dyn Backend>,
}

impl RegisteredBackend {
    pub fn namespace(&self) -> &str {
        &self.descriptor.namespace
    }
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Namespace-keyed set of backends, in configuration order
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
    by_namespace: HashMap<String, usize>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate every descriptor, then connect each one.
    ///
    /// Fails without building any client if a descriptor is invalid or two
    /// descriptors share a namespace.
    pub fn load(descriptors: Vec<BackendDescriptor>, connector: &dyn Connector) -> Result<Self> {
        let mut by_namespace = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate()?;
            if let Some(previous) = by_namespace.insert(descriptor.namespace.clone(), index) {
                return Err(RmfError::Config(format!(
                    "namespace '{}' is used by both '{}' and '{}'",
                    descriptor.namespace, descriptors[previous].name, descriptor.name
                )));
            }
        }

        let mut backends = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let client = connector.connect(&descriptor)?;
            tracing::debug!(namespace = %descriptor.namespace, base_url = %descriptor.base_url, "Registered backend");
            backends.push(RegisteredBackend { descriptor, client });
        }

        Ok(Self { backends, by_namespace })
    }

    /// Find the backend serving a namespace
    pub fn lookup(&self, namespace: &str) -> Result<&RegisteredBackend> {
        self.get(namespace)
            .ok_or_else(|| RmfError::NotFound(format!("no backend registered for namespace '{}'", namespace)))
    }

    pub fn get(&self, namespace: &str) -> Option<&RegisteredBackend> {
        self.by_namespace.get(namespace).map(|&index| &self.backends[index])
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.by_namespace.contains_key(namespace)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredBackend> {
        self.backends.iter()
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.namespace()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
