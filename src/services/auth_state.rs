// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Startup bootstrap and ongoing reconciliation of authentication state.
//!
//! Authentication and the profile are independent slots: a valid session
//! marks the user authenticated right away, and the profile arrives later
//! from a spawned resolution. A profile failure never revokes
//! authentication.

use super::profile::ProfileResolver;
use super::session_cache::SessionCache;
use crate::backend::{AuthApi, ProfileApi};
use crate::error::{AuthFailure, Result};
use crate::models::{
    AuthChange, AuthEvent, Notice, Session, SignInForm, SignUpForm, UserIdentity, UserProfile,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPhase {
    Loading,
    Authenticated,
    Unauthenticated,
    Error,
}

/// Auth state as seen by the UI.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub is_authenticated: bool,
    pub user: Option<UserIdentity>,
    pub profile: Option<UserProfile>,
    pub notice: Option<Notice>,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            phase: AuthPhase::Loading,
            is_authenticated: false,
            user: None,
            profile: None,
            notice: None,
        }
    }
}

/// Result of a successful sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn,
    /// The account exists but the e-mail must be confirmed first
    ConfirmationRequired,
}

pub struct AuthStateReconciler {
    auth: Arc<dyn AuthApi>,
    cache: SessionCache,
    resolver: ProfileResolver,
    state: watch::Sender<AuthSnapshot>,
    initializing: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// User whose profile resolution has been started, until sign-out
    profile_owner: Mutex<Option<String>>,
    validate_timeout: Duration,
}

impl AuthStateReconciler {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        profiles: Arc<dyn ProfileApi>,
        cache: SessionCache,
        validate_timeout: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Arc::new(Self {
            auth,
            resolver: ProfileResolver::new(cache.clone(), profiles),
            cache,
            state,
            initializing: AtomicBool::new(false),
            listener: Mutex::new(None),
            profile_owner: Mutex::new(None),
            validate_timeout,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Bootstrap auth state. A call made while another is running is
    /// skipped and returns the current phase.
    pub async fn initialize(self: &Arc<Self>) -> AuthPhase {
        if self.initializing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Auth initialization already running, skipping");
            return self.state.borrow().phase;
        }

        let phase = self.run_initialization().await;
        self.initializing.store(false, Ordering::SeqCst);
        tracing::info!(?phase, "Auth initialization finished");
        phase
    }

    async fn run_initialization(self: &Arc<Self>) -> AuthPhase {
        self.state.send_modify(|s| {
            s.phase = AuthPhase::Loading;
            s.notice = None;
        });

        if let Err(e) = self.auth.health_check().await {
            tracing::warn!(error = %e, "Auth service unreachable");
            self.set_error(Notice::retryable(
                "You appear to be offline. Check your connection and try again.",
            ));
            return AuthPhase::Error;
        }

        match self.bootstrap().await {
            Ok(phase) => phase,
            Err(e) => {
                tracing::warn!(error = %e, "Auth bootstrap failed, attempting recovery");
                self.recover().await
            }
        }
    }

    async fn bootstrap(self: &Arc<Self>) -> Result<AuthPhase> {
        let session = self.cache.validate_session(self.validate_timeout).await;
        let phase = self.apply_session(session).await;
        self.register_listener()?;
        Ok(phase)
    }

    async fn recover(self: &Arc<Self>) -> AuthPhase {
        match self.cache.get_session_sync().await {
            Some(session) => {
                let phase = self.apply_session(Some(session)).await;
                if let Err(e) = self.register_listener() {
                    tracing::warn!(error = %e, "Auth listener still unavailable");
                }
                phase
            }
            None => {
                self.set_error(Notice::retryable(
                    "We couldn't verify your session. Please try again.",
                ));
                AuthPhase::Error
            }
        }
    }

    async fn apply_session(self: &Arc<Self>, session: Option<Session>) -> AuthPhase {
        let user = match session {
            Some(Session { user: Some(user), .. }) => Some(user),
            Some(_) => self.cache.get_current_user().await,
            None => None,
        };

        match user {
            Some(user) => {
                self.mark_authenticated(user);
                AuthPhase::Authenticated
            }
            None => {
                self.mark_signed_out();
                AuthPhase::Unauthenticated
            }
        }
    }

    fn mark_authenticated(self: &Arc<Self>, user: UserIdentity) {
        tracing::info!(user_id = %user.id, "Authenticated");
        self.state.send_modify(|s| {
            s.phase = AuthPhase::Authenticated;
            s.is_authenticated = true;
            if s.profile.as_ref().is_some_and(|p| p.id != user.id) {
                s.profile = None;
            }
            s.user = Some(user.clone());
            s.notice = None;
        });

        // Sign-in reaches here twice: once directly and once via the
        // SIGNED_IN event.
        {
            let mut owner = self.profile_owner.lock();
            if owner.as_deref() == Some(user.id.as_str()) {
                tracing::debug!(user_id = %user.id, "Profile already resolving");
                return;
            }
            *owner = Some(user.id.clone());
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let profile = this.resolver.ensure_profile(&user).await;
            this.state.send_modify(|s| {
                // Drop results for a user who is no longer signed in.
                let current = s.user.as_ref().map(|u| u.id.as_str());
                if s.is_authenticated && current == Some(profile.id.as_str()) {
                    s.profile = Some(profile);
                }
            });
        });
    }

    fn mark_signed_out(&self) {
        *self.profile_owner.lock() = None;
        self.state.send_modify(|s| {
            s.phase = AuthPhase::Unauthenticated;
            s.is_authenticated = false;
            s.user = None;
            s.profile = None;
        });
    }

    fn set_error(&self, notice: Notice) {
        self.state.send_modify(|s| {
            s.phase = AuthPhase::Error;
            s.notice = Some(notice);
        });
    }

    /// Subscribe to auth events once; later calls are no-ops.
    fn register_listener(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.listener.lock();
        if slot.is_some() {
            tracing::debug!("Auth listener already registered");
            return Ok(());
        }

        let mut events = self.auth.subscribe()?;
        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => this.handle_auth_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Auth event stream closed");
        }));
        Ok(())
    }

    /// Apply one auth event to the published state.
    pub async fn handle_auth_change(self: &Arc<Self>, change: AuthChange) {
        tracing::debug!(event = ?change.event, "Auth event");
        match (change.event, change.session) {
            (AuthEvent::InitialSession, _) => {}
            (AuthEvent::SignedOut, _) | (_, None) => {
                self.cache.clear_cache();
                self.mark_signed_out();
            }
            (AuthEvent::TokenRefreshed, Some(session)) => {
                if self.state.borrow().is_authenticated {
                    self.cache.remember_session(Some(session));
                } else {
                    tracing::debug!("Ignoring token refresh while signed out");
                }
            }
            (AuthEvent::SignedIn, Some(session)) => {
                self.cache.remember_session(Some(session.clone()));
                self.apply_session(Some(session)).await;
            }
            (AuthEvent::UserUpdated, Some(session)) => {
                if !self.state.borrow().is_authenticated {
                    tracing::debug!("Ignoring user update while signed out");
                    return;
                }
                if let Some(user) = session.user.clone() {
                    self.state.send_modify(|s| s.user = Some(user));
                }
                self.cache.remember_session(Some(session));
            }
        }
    }

    pub async fn sign_in(
        self: &Arc<Self>,
        form: &SignInForm,
    ) -> std::result::Result<(), AuthFailure> {
        form.validate().map_err(|e| AuthFailure::from_validation(&e))?;

        let session = self
            .auth
            .sign_in(form.email.trim(), &form.password)
            .await
            .map_err(|e| {
                tracing::info!(error = %e, "Sign-in rejected");
                AuthFailure::from_backend(&e)
            })?;

        self.cache.remember_session(Some(session.clone()));
        self.apply_session(Some(session)).await;
        Ok(())
    }

    pub async fn sign_up(
        self: &Arc<Self>,
        form: &SignUpForm,
    ) -> std::result::Result<SignUpOutcome, AuthFailure> {
        form.validate().map_err(|e| AuthFailure::from_validation(&e))?;

        let session = self
            .auth
            .sign_up(form.email.trim(), &form.password, &form.metadata())
            .await
            .map_err(|e| {
                tracing::info!(error = %e, "Sign-up rejected");
                AuthFailure::from_backend(&e)
            })?;

        match session {
            Some(session) => {
                self.cache.remember_session(Some(session.clone()));
                self.apply_session(Some(session)).await;
                Ok(SignUpOutcome::SignedIn)
            }
            None => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    /// Sign out and clear local state. Returns whether the remote call
    /// succeeded; local state is cleared either way.
    pub async fn sign_out(&self) -> bool {
        let remote_ok = self.cache.sign_out().await;
        self.mark_signed_out();
        remote_ok
    }

    /// Stop listening for auth events.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.initializing.store(false, Ordering::SeqCst);
    }
}
