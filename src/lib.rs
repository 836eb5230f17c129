// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! HadalHub: client core for a language-learning debate platform.
//!
//! This crate keeps the signed-in session cached and reconciled with the
//! hosted backend, and drives the lifecycle of scheduled debate groups.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use backend::{GroupApi, ProfileApi, RealtimeApi};
use config::Config;
use parking_lot::RwLock;
use services::{
    AuthSnapshot, AuthStateReconciler, GroupLifecycleController, GroupTasks, GroupTimings,
    ReconcileTrigger, SessionCache, Viewer,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub session_cache: SessionCache,
    pub auth_state: Arc<AuthStateReconciler>,
    groups: RwLock<Option<Arc<GroupLifecycleController>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        session_cache: SessionCache,
        auth_state: Arc<AuthStateReconciler>,
    ) -> Self {
        Self {
            config,
            session_cache,
            auth_state,
            groups: RwLock::new(None),
        }
    }

    /// Group controller for the signed-in viewer, if one is running.
    pub fn groups(&self) -> Option<Arc<GroupLifecycleController>> {
        self.groups.read().clone()
    }

    pub fn set_groups(&self, controller: Option<Arc<GroupLifecycleController>>) {
        *self.groups.write() = controller;
    }
}

/// Backend handles the group lifecycle needs.
#[derive(Clone)]
pub struct GroupBackends {
    pub groups: Arc<dyn GroupApi>,
    pub profiles: Arc<dyn ProfileApi>,
    pub realtime: Option<Arc<dyn RealtimeApi>>,
}

/// Run a group controller for whoever is signed in.
///
/// A controller starts once the profile is known and is torn down on
/// sign-out or when a different user signs in. Returns when the auth state
/// channel closes.
pub async fn supervise_groups(
    state: Arc<AppState>,
    backends: GroupBackends,
    mut auth: watch::Receiver<AuthSnapshot>,
) {
    let timings = GroupTimings::from_config(&state.config);
    let mut running: Option<(String, GroupTasks)> = None;

    loop {
        let profile = {
            let snapshot = auth.borrow_and_update();
            snapshot
                .profile
                .clone()
                .filter(|_| snapshot.is_authenticated)
        };

        let current = running.as_ref().map(|(user_id, _)| user_id.as_str());
        if current != profile.as_ref().map(|p| p.id.as_str()) {
            if let Some((user_id, tasks)) = running.take() {
                tracing::info!(user_id = %user_id, "Stopping group lifecycle");
                tasks.shutdown();
                state.set_groups(None);
            }

            if let Some(profile) = profile {
                let viewer = Viewer::resolve(&profile, backends.profiles.as_ref()).await;
                let controller = GroupLifecycleController::new(
                    Arc::clone(&backends.groups),
                    backends.realtime.clone(),
                    viewer,
                    timings.clone(),
                );
                controller
                    .request_reconciliation(ReconcileTrigger::Initial)
                    .await;
                state.set_groups(Some(Arc::clone(&controller)));
                running = Some((profile.id, controller.start()));
            }
        }

        if auth.changed().await.is_err() {
            break;
        }
    }

    if let Some((_, tasks)) = running {
        tasks.shutdown();
    }
    state.set_groups(None);
}
