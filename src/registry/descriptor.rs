//! Backend descriptors and retry policies
//!
//! Descriptors are closed structs checked once when the registry loads.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::catalog::NAMESPACE_SEPARATOR;
use crate::error::{Result, RmfError};

/// Default per-attempt timeout for a backend
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Exponential backoff parameters for one backend
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction in [0, 1] by which each delay is randomly scaled
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay after failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts < 1 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.initial_delay.is_zero() {
            return Err("retry.initial_delay must be positive".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err(format!(
                "retry.max_delay ({:?}) must not be less than retry.initial_delay ({:?})",
                self.max_delay, self.initial_delay
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("retry.multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("retry.jitter must be within [0, 1], got {}", self.jitter));
        }
        Ok(())
    }
}

/// One configured remote tool server
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    /// Display name (e.g., "Fetch MCP")
    pub name: String,
    /// Root URL the HTTP client resolves endpoints against
    pub base_url: String,
    /// Prefix for every tool id this backend contributes
    pub namespace: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Headers sent on every request
    pub headers: BTreeMap<String, String>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            namespace: namespace.into(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
            retry: RetryPolicy::default(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check field invariants; namespace uniqueness is checked by the registry
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| RmfError::Config(format!("backend '{}': {}", self.name, reason));

        if self.name.trim().is_empty() {
            return Err(RmfError::Config("backend name must not be empty".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(fail("namespace must not be empty".to_string()));
        }
        if self.namespace.contains(NAMESPACE_SEPARATOR) || self.namespace.contains(char::is_whitespace) {
            return Err(fail(format!(
                "namespace '{}' must not contain '{}' or whitespace",
                self.namespace, NAMESPACE_SEPARATOR
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(fail(format!("base_url '{}' must be an http(s) URL", self.base_url)));
        }
        if self.timeout.is_zero() {
            return Err(fail("timeout must be positive".to_string()));
        }
        self.retry.validate().map_err(fail)
    }
}
