// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Generic TTL slot and single-flight guard.
//!
//! Ages are measured with `tokio::time::Instant` so tests can drive them
//! with a paused clock.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A cached value plus the instant it was last confirmed against its source.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: Option<T>,
    last_check: Option<Instant>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_check: None,
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value regardless of age.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }

    /// Time since the last confirmation, `None` if never checked.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_check
            .map(|checked| now.saturating_duration_since(checked))
    }

    /// The cached value if it is strictly younger than `max_age`.
    pub fn fresh(&self, max_age: Duration, now: Instant) -> Option<&T> {
        match self.age(now) {
            Some(age) if age < max_age => self.value.as_ref(),
            _ => None,
        }
    }

    /// Record a confirmed value (`None` means "confirmed absent").
    pub fn store(&mut self, value: Option<T>, now: Instant) {
        self.value = value;
        self.last_check = Some(now);
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.last_check = None;
    }
}

/// State of a guarded operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flight {
    #[default]
    Idle,
    Running,
}

/// At most one in-flight operation; other callers can wait for it to land.
#[derive(Debug, Default)]
pub struct SingleFlight {
    state: Mutex<Flight>,
    done: Notify,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == Flight::Running
    }

    /// Claim the flight. Returns `None` if another caller holds it.
    ///
    /// The flight is released when the returned guard drops, on every path.
    pub fn try_claim(self: &Arc<Self>) -> Option<FlightGuard> {
        let mut state = self.state.lock();
        if *state == Flight::Running {
            return None;
        }
        *state = Flight::Running;
        Some(FlightGuard {
            flight: Arc::clone(self),
        })
    }

    /// Wait up to `bound` for the current flight to finish.
    ///
    /// Returns true if the flight is idle by the time this returns.
    pub async fn wait_idle(&self, bound: Duration) -> bool {
        let notified = self.done.notified();
        tokio::pin!(notified);
        // Register before checking so a release in between is not missed.
        notified.as_mut().enable();

        if !self.is_running() {
            return true;
        }
        tokio::time::timeout(bound, notified).await.is_ok()
    }
}

/// Releases its [`SingleFlight`] on drop.
#[derive(Debug)]
pub struct FlightGuard {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        *self.flight.state.lock() = Flight::Idle;
        self.flight.done.notify_waiters();
    }
}
