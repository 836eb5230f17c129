// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HadalHub client daemon
//!
//! Keeps a learner's session reconciled with the hosted backend, drives the
//! debate group lifecycle and serves a local diagnostics endpoint.

use hadal_hub::{
    backend::{AuthApi, GroupApi, ProfileApi, RealtimeApi, SupabaseClient, SupabaseRealtime},
    config::Config,
    models::SignInForm,
    services::{AuthPhase, AuthStateReconciler, SessionCache},
    supervise_groups, AppState, GroupBackends,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.diagnostics_port,
        backend = %config.supabase_url,
        "Starting HadalHub client"
    );

    let client = SupabaseClient::new(&config).expect("Failed to build backend client");
    let auth: Arc<dyn AuthApi> = Arc::new(client.clone());
    let profiles: Arc<dyn ProfileApi> = Arc::new(client.clone());
    let groups: Arc<dyn GroupApi> = Arc::new(client.clone());
    let realtime: Option<Arc<dyn RealtimeApi>> = if config.realtime_enabled {
        Some(Arc::new(SupabaseRealtime::new(client.clone())))
    } else {
        tracing::info!("Realtime disabled, group board relies on polling");
        None
    };

    let session_cache = SessionCache::new(Arc::clone(&auth), Arc::clone(&profiles));
    let refresher = session_cache.spawn_background_refresh(config.background_refresh_interval);

    let auth_state = AuthStateReconciler::new(
        auth,
        Arc::clone(&profiles),
        session_cache.clone(),
        config.session_validate_timeout,
    );
    let phase = auth_state.initialize().await;

    if phase == AuthPhase::Unauthenticated {
        if let Some(credentials) = &config.sign_in {
            let form = SignInForm {
                email: credentials.email.clone(),
                password: credentials.password.clone(),
            };
            match auth_state.sign_in(&form).await {
                Ok(()) => tracing::info!("Signed in with configured account"),
                Err(failure) => tracing::warn!(reason = %failure, "Configured sign-in failed"),
            }
        }
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        session_cache,
        Arc::clone(&auth_state),
    ));

    let supervisor = tokio::spawn(supervise_groups(
        Arc::clone(&state),
        GroupBackends {
            groups,
            profiles,
            realtime,
        },
        auth_state.subscribe(),
    ));

    // Build router
    let app = hadal_hub::routes::create_router(state);

    // Start diagnostics server
    let addr = format!("127.0.0.1:{}", config.diagnostics_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Diagnostics listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Shutting down");
    auth_state.shutdown();
    refresher.abort();
    supervisor.abort();
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hadal_hub=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
