//! Retry layer
//!
//! Absorbs transient backend failures with exponential backoff. Delay math
//! lives in `Backoff`; the wait itself goes through a `Sleeper` so tests can
//! record delays instead of sleeping.

pub mod backoff;
pub mod executor;

use std::time::Duration;

use async_trait::async_trait;

pub use backoff::{Backoff, apply_jitter};
pub use executor::{RetryError, RetryExecutor, Retried};

/// Waits between retry attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
