// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User interaction tracking for the activity-aware session TTL.

use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Interaction events that count as user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Keydown,
    Scroll,
    Mousemove,
}

/// Timestamp of the most recent user interaction.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    last_activity: Mutex<Option<Instant>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: InteractionKind) {
        *self.last_activity.lock() = Some(Instant::now());
        tracing::trace!(?kind, "User activity");
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.lock()
    }

    pub fn since_last(&self, now: Instant) -> Option<Duration> {
        self.last_activity()
            .map(|at| now.saturating_duration_since(at))
    }

    /// Whether the user interacted within `window` of `now`.
    pub fn is_recent(&self, window: Duration, now: Instant) -> bool {
        self.since_last(now).is_some_and(|since| since < window)
    }
}
