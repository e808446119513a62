//! Exponential backoff
//!
//! Used for poll pacing (no jitter, reset on success) and for retrying
//! transient coordinator failures (jittered, bounded attempts).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    /// Backoff starting at `base`, doubling up to `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
            jitter: false,
        }
    }

    /// Randomize each delay within [delay/2, delay]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay the next wait would use, before jitter
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the delay, never past the cap
    pub fn increase(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay to wait now; grows the backoff for the following call
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.jitter {
            jittered(self.current)
        } else {
            self.current
        };
        self.increase();
        delay
    }
}

fn jittered(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = delay.saturating_sub(half).as_millis() as u64;
    if spread == 0 {
        return delay;
    }
    half + Duration::from_millis(rand::rng().random_range(0..=spread))
}

/// Bounded retry of transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay).with_jitter()
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, runs out
/// of attempts, or `cancel` fires. Returns the last error in the failure cases.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(err);
        }

        let delay = backoff.next_delay();
        warn!(
            "{} failed (attempt {}/{}): {}; retrying in {:?}",
            what, attempt, policy.max_attempts, err, delay
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(err),
        }
    }
}

/// Sleeps for `delay` unless `cancel` fires first; false when cancelled
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
