//! Retry executor - runs a backend operation under a retry policy

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use super::backoff::Backoff;
use super::{Sleeper, TokioSleeper};
use crate::backend::BackendError;
use crate::registry::RetryPolicy;

/// Why the executor gave up
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("permanent failure on attempt {attempts}: {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: BackendError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// A successful result and the attempt that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

pub struct RetryExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor {
    /// Executor that waits on the tokio timer
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. Each attempt is bounded by `attempt_timeout` when given.
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        attempt_timeout: Option<Duration>,
        mut operation: F,
    ) -> Result<Retried<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut backoff = Backoff::new(policy.clone());

        loop {
            let attempt = backoff.next_attempt();
            let outcome = match attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(limit)),
                },
                None => operation().await,
            };

            let err = match outcome {
                Ok(value) => return Ok(Retried { value, attempts: attempt }),
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::debug!(attempt, error = %err, "Permanent backend failure");
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    source: err,
                });
            }

            match backoff.on_failure() {
                Some(delay) => {
                    let delay = backoff.jittered(delay, rand::rng().random::<f64>());
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient backend failure, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                None => {
                    tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }
}
