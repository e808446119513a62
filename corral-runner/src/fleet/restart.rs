//! Crash restart bookkeeping for one agent slot

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::RestartPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Start the slot again once `delay` has passed
    Restart { delay: Duration },
    /// Too many crashes inside the window
    GiveUp,
}

/// Sliding window of recent crashes
#[derive(Debug, Default, Clone)]
pub struct RestartTracker {
    crashes: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a crash at `now` and decides what happens next
    ///
    /// The first crash in the window restarts immediately, later ones wait
    /// `base_delay` doubling up to `max_delay`.
    pub fn record(&mut self, now: Instant, policy: &RestartPolicy) -> RestartDecision {
        while let Some(&oldest) = self.crashes.front() {
            if now.duration_since(oldest) >= policy.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        self.crashes.push_back(now);

        let crashes = self.crashes.len() as u32;
        if crashes > policy.max_restarts {
            return RestartDecision::GiveUp;
        }
        if crashes == 1 {
            return RestartDecision::Restart {
                delay: Duration::ZERO,
            };
        }

        let factor = 2u32.saturating_pow(crashes - 2);
        let delay = policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(policy.max_delay)
            .min(policy.max_delay);
        RestartDecision::Restart { delay }
    }

    /// Crashes still inside the window as of the last record
    pub fn recent(&self) -> usize {
        self.crashes.len()
    }

    pub fn reset(&mut self) {
        self.crashes.clear();
    }
}
