//! Per-group activation countdown.

use crate::time_utils::format_countdown;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Remaining(Duration),
    /// Remaining time reached zero on this tick
    Fire,
    /// Already fired; waiting for the group to leave `scheduled`
    Elapsed,
}

/// Countdown to a scheduled group's activation time.
///
/// Fires exactly once when remaining time first reaches zero. The fired
/// flag resets only while remaining time is positive again, e.g. after the
/// activation time was moved later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    activation_time: DateTime<Utc>,
    fired: bool,
}

impl Countdown {
    pub fn new(activation_time: DateTime<Utc>) -> Self {
        Self {
            activation_time,
            fired: false,
        }
    }

    pub fn activation_time(&self) -> DateTime<Utc> {
        self.activation_time
    }

    pub fn reschedule(&mut self, activation_time: DateTime<Utc>) {
        self.activation_time = activation_time;
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.activation_time - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> CountdownTick {
        let remaining = self.remaining(now);
        if !remaining.is_zero() {
            self.fired = false;
            CountdownTick::Remaining(remaining)
        } else if !self.fired {
            self.fired = true;
            CountdownTick::Fire
        } else {
            CountdownTick::Elapsed
        }
    }

    pub fn label(&self, now: DateTime<Utc>) -> String {
        format_countdown(self.remaining(now))
    }
}
