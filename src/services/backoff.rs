//! Retry schedule for the realtime subscription.

use std::time::Duration;

/// Exponential backoff with a delay ceiling and a cap on consecutive
/// failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub const fn new(base: Duration, factor: u32, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// 1s, 2s, 4s, ... capped at 30s, giving up after 10 failures in a row.
    pub const fn realtime() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(30), 10)
    }

    /// Delay before the next attempt, or `None` once the failure budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let multiplier = self.factor.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.base.saturating_mul(multiplier).min(self.max_delay))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn failures(&self) -> u32 {
        self.attempt
    }
}
