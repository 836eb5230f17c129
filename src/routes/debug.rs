// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-only cache and group snapshots, plus the cache reset used for
//! recovery.

use crate::error::{AppError, Result};
use crate::services::{AuthSnapshot, CacheStatus, GroupBoard};
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/debug/cache", get(cache_status))
        .route("/debug/cache/clear", post(clear_cache))
        .route("/debug/auth", get(auth_snapshot))
        .route("/debug/groups", get(group_board))
}

async fn cache_status(State(state): State<Arc<AppState>>) -> Json<CacheStatus> {
    Json(state.session_cache.cache_status())
}

#[derive(Serialize)]
pub struct ClearCacheResponse {
    pub cleared: bool,
    pub status: CacheStatus,
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<ClearCacheResponse> {
    state.session_cache.clear_cache();
    tracing::info!("Session cache cleared via diagnostics");
    Json(ClearCacheResponse {
        cleared: true,
        status: state.session_cache.cache_status(),
    })
}

async fn auth_snapshot(State(state): State<Arc<AppState>>) -> Json<AuthSnapshot> {
    Json(state.auth_state.snapshot())
}

async fn group_board(State(state): State<Arc<AppState>>) -> Result<Json<GroupBoard>> {
    let controller = state
        .groups()
        .ok_or_else(|| AppError::NotFound("No group board for a signed-out viewer".to_string()))?;
    Ok(Json(controller.board()))
}
