// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - client core logic.

pub mod activity;
pub mod auth_state;
pub mod backoff;
pub mod countdown;
pub mod groups;
pub mod profile;
pub mod session_cache;
pub mod ttl_cache;

pub use activity::{ActivityTracker, InteractionKind};
pub use auth_state::{AuthPhase, AuthSnapshot, AuthStateReconciler, SignUpOutcome};
pub use backoff::Backoff;
pub use countdown::{Countdown, CountdownTick};
pub use groups::{
    AdminOutcome, ChatRoute, ConfirmPrompt, Confirmer, GroupBoard, GroupLifecycleController,
    GroupTasks, GroupTimings, JoinOutcome, ReconcileTrigger, Viewer,
};
pub use profile::ProfileResolver;
pub use session_cache::{CacheStatus, SessionCache};
