//! Backoff state machine
//!
//! Pure arithmetic: tracks failures and yields the next delay. Waiting is the
//! caller's job.

use std::time::Duration;

use crate::registry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    /// Transient failures recorded so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Attempt number about to run (1-indexed)
    pub fn next_attempt(&self) -> u32 {
        self.failures + 1
    }

    /// Record a transient failure.
    ///
    /// Returns the un-jittered delay before the next attempt, or `None` once
    /// `max_attempts` attempts have failed.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_for(self.failures - 1))
    }

    /// Scale `delay` by a factor in `[1 - jitter, 1 + jitter]` chosen by
    /// `unit` in `[0, 1)`, capped at the policy's max delay.
    pub fn jittered(&self, delay: Duration, unit: f64) -> Duration {
        apply_jitter(delay, self.policy.jitter, self.policy.max_delay, unit)
    }
}

pub fn apply_jitter(delay: Duration, jitter: f64, max_delay: Duration, unit: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 - jitter + 2.0 * jitter * unit.clamp(0.0, 1.0);
    let secs = (delay.as_secs_f64() * factor).min(max_delay.as_secs_f64());
    Duration::from_secs_f64(secs.max(0.0))
}
