// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory cache of the current session, identity and profile.
//!
//! Every read is failure-transparent: callers get `Option` back and the
//! cache logs what went wrong. Session freshness depends on recent user
//! activity so an active user does not pay for a validation round-trip
//! every two minutes.
//!
//! Concurrency:
//! - Foreground validation is single-flight. Concurrent callers wait (up to
//!   3 seconds) for the running one instead of issuing their own request.
//! - Background validation is single-flight on its own guard, so it never
//!   blocks a foreground caller. The two may overlap; last write wins.
//! - Clearing the cache starts a new generation. A lookup that began in an
//!   earlier generation never writes its result back, so a sign-out cannot
//!   be undone by a validation that was already in flight.

use super::activity::{ActivityTracker, InteractionKind};
use super::ttl_cache::{CacheEntry, SingleFlight};
use crate::backend::{AuthApi, ProfileApi};
use crate::models::{Session, UserIdentity, UserProfile};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Session max-age with no recent interaction.
pub const SESSION_MAX_AGE_IDLE: Duration = Duration::from_secs(120);
/// Session max-age when the user interacted within [`ACTIVITY_WINDOW`].
pub const SESSION_MAX_AGE_ACTIVE: Duration = Duration::from_secs(300);
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const USER_MAX_AGE: Duration = Duration::from_secs(600);
pub const PROFILE_MAX_AGE: Duration = Duration::from_secs(600);
/// A cached session younger than this is returned by `validate_session`
/// without a foreground round-trip.
pub const VALIDATE_FRESH_AGE: Duration = Duration::from_secs(120);
/// How long a second foreground caller waits for the running validation.
pub const FOREGROUND_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct Slots {
    session: CacheEntry<Session>,
    user: CacheEntry<UserIdentity>,
    profile: CacheEntry<UserProfile>,
    generation: u64,
}

impl Slots {
    fn store_session(&mut self, session: Option<Session>, now: Instant) {
        if let Some(user) = session.as_ref().and_then(|s| s.user.clone()) {
            self.user.store(Some(user), now);
        }
        self.session.store(session, now);
    }
}

/// Read-only snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub has_session: bool,
    pub has_user: bool,
    pub has_profile: bool,
    /// Age of the session slot in milliseconds
    pub cache_age_ms: Option<u64>,
    pub is_validating: bool,
    pub background_validating: bool,
    pub ms_since_activity: Option<u64>,
}

/// Cheap-to-clone handle; all clones share one cache.
#[derive(Clone)]
pub struct SessionCache {
    auth: Arc<dyn AuthApi>,
    profiles: Arc<dyn ProfileApi>,
    slots: Arc<Mutex<Slots>>,
    foreground: Arc<SingleFlight>,
    background: Arc<SingleFlight>,
    activity: Arc<ActivityTracker>,
}

impl SessionCache {
    pub fn new(auth: Arc<dyn AuthApi>, profiles: Arc<dyn ProfileApi>) -> Self {
        Self {
            auth,
            profiles,
            slots: Arc::new(Mutex::new(Slots::default())),
            foreground: Arc::new(SingleFlight::new()),
            background: Arc::new(SingleFlight::new()),
            activity: Arc::new(ActivityTracker::new()),
        }
    }

    /// Session max-age in effect at `now`.
    pub fn session_max_age(&self, now: Instant) -> Duration {
        if self.activity.is_recent(ACTIVITY_WINDOW, now) {
            SESSION_MAX_AGE_ACTIVE
        } else {
            SESSION_MAX_AGE_IDLE
        }
    }

    /// Cached session if fresh, else one remote lookup.
    pub async fn get_session_sync(&self) -> Option<Session> {
        let now = Instant::now();
        let max_age = self.session_max_age(now);
        let cached = self.slots.lock().session.fresh(max_age, now).cloned();
        if let Some(session) = cached {
            tracing::trace!("Session cache hit");
            return Some(session);
        }

        let generation = self.generation();
        match self.auth.get_session().await {
            Ok(session) => self.remember_fetched(generation, session),
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, using cached session");
                self.cached_session()
            }
        }
    }

    /// Cached identity if fresh, else a remote lookup. Falls back to the
    /// last known identity when the lookup fails.
    pub async fn get_current_user(&self) -> Option<UserIdentity> {
        let now = Instant::now();
        let cached = self.slots.lock().user.fresh(USER_MAX_AGE, now).cloned();
        if cached.is_some() {
            return cached;
        }

        let generation = self.generation();
        match self.auth.get_user().await {
            Ok(user) => {
                let mut slots = self.slots.lock();
                if slots.generation != generation {
                    tracing::debug!("Cache cleared during user lookup, dropping result");
                    return slots.user.value().cloned();
                }
                slots.user.store(user.clone(), Instant::now());
                user
            }
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed, using last known identity");
                self.slots.lock().user.value().cloned()
            }
        }
    }

    pub async fn get_user_profile(&self, user_id: &str) -> Option<UserProfile> {
        let now = Instant::now();
        let cached = self
            .slots
            .lock()
            .profile
            .fresh(PROFILE_MAX_AGE, now)
            .filter(|p| p.id == user_id)
            .cloned();
        if cached.is_some() {
            return cached;
        }

        let generation = self.generation();
        match self.profiles.fetch_profile(user_id).await {
            Ok(profile) => {
                let mut slots = self.slots.lock();
                if slots.generation == generation {
                    slots.profile.store(Some(profile.clone()), Instant::now());
                }
                Some(profile)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(user_id = %user_id, "Profile row not found");
                self.slots
                    .lock()
                    .profile
                    .value()
                    .filter(|p| p.id == user_id)
                    .cloned()
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Profile fetch failed");
                None
            }
        }
    }

    /// Validate the session, bounded by `timeout`.
    ///
    /// Returns a young cached session immediately (revalidating it in the
    /// background), joins a foreground validation already in flight, or
    /// performs one itself. On timeout or error the stale cached session,
    /// if any, is returned.
    pub async fn validate_session(&self, timeout: Duration) -> Option<Session> {
        let now = Instant::now();
        let cached = self
            .slots
            .lock()
            .session
            .fresh(VALIDATE_FRESH_AGE, now)
            .cloned();
        if let Some(session) = cached {
            if !self.background.is_running() {
                self.spawn_background_validation();
            }
            return Some(session);
        }

        let Some(_guard) = self.foreground.try_claim() else {
            tracing::debug!("Session validation already in flight, waiting");
            if !self.foreground.wait_idle(FOREGROUND_WAIT).await {
                tracing::debug!("Gave up waiting for in-flight session validation");
            }
            return self.cached_session();
        };

        let generation = self.generation();
        match tokio::time::timeout(timeout, self.auth.get_session()).await {
            Ok(Ok(session)) => self.remember_fetched(generation, session),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Session validation failed, using cached session");
                self.cached_session()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Session validation timed out, using cached session"
                );
                self.cached_session()
            }
        }
    }

    /// Revalidate silently. No-op while another background validation runs.
    pub async fn background_validate_session(&self) {
        let Some(_guard) = self.background.try_claim() else {
            tracing::trace!("Background validation already running");
            return;
        };

        let generation = self.generation();
        match self.auth.get_session().await {
            Ok(session) => {
                self.remember_fetched(generation, session);
            }
            Err(e) => tracing::warn!(error = %e, "Background session validation failed"),
        }
    }

    fn spawn_background_validation(&self) {
        let cache = self.clone();
        tokio::spawn(async move { cache.background_validate_session().await });
    }

    /// Periodic background validation, stopped by aborting the handle.
    pub fn spawn_background_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.background_validate_session().await;
            }
        })
    }

    /// The window became visible again; revalidate opportunistically.
    pub fn on_visibility_change(&self, visible: bool) {
        if visible && !self.background.is_running() {
            self.spawn_background_validation();
        }
    }

    /// Sign out remotely, then drop everything local regardless of the
    /// outcome. Returns whether the remote call succeeded.
    pub async fn sign_out(&self) -> bool {
        let result = self.auth.sign_out().await;
        self.clear_cache();
        self.auth.clear_persisted_session();

        match result {
            Ok(()) => {
                tracing::info!("Signed out");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote sign-out failed, local state cleared anyway");
                false
            }
        }
    }

    pub fn clear_cache(&self) {
        let mut slots = self.slots.lock();
        let generation = slots.generation.wrapping_add(1);
        *slots = Slots {
            generation,
            ..Slots::default()
        };
        tracing::debug!(generation, "Session cache cleared");
    }

    fn generation(&self) -> u64 {
        self.slots.lock().generation
    }

    /// Store a looked-up session unless the cache was cleared since the
    /// lookup started. Returns what the cache holds afterwards.
    fn remember_fetched(&self, generation: u64, session: Option<Session>) -> Option<Session> {
        let mut slots = self.slots.lock();
        if slots.generation != generation {
            tracing::debug!("Cache cleared during session lookup, dropping result");
            return slots.session.value().cloned();
        }
        slots.store_session(session.clone(), Instant::now());
        session
    }

    /// Store a session confirmed by the auth service, with its embedded
    /// identity.
    pub fn remember_session(&self, session: Option<Session>) {
        self.slots.lock().store_session(session, Instant::now());
    }

    /// The cached session regardless of age.
    pub fn cached_session(&self) -> Option<Session> {
        self.slots.lock().session.value().cloned()
    }

    pub fn record_activity(&self, kind: InteractionKind) {
        self.activity.record(kind);
    }

    pub fn cache_status(&self) -> CacheStatus {
        let now = Instant::now();
        let slots = self.slots.lock();
        CacheStatus {
            has_session: slots.session.value().is_some(),
            has_user: slots.user.value().is_some(),
            has_profile: slots.profile.value().is_some(),
            cache_age_ms: slots.session.age(now).map(|age| age.as_millis() as u64),
            is_validating: self.foreground.is_running(),
            background_validating: self.background.is_running(),
            ms_since_activity: self
                .activity
                .since_last(now)
                .map(|since| since.as_millis() as u64),
        }
    }
}
