// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Signals reported by the UI shell: user interaction and window
//! visibility. Both feed the session cache.

use crate::services::InteractionKind;
use crate::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/client/activity", post(report_activity))
        .route("/client/visibility", post(report_visibility))
}

#[derive(Debug, Deserialize)]
pub struct ActivityReport {
    pub kind: InteractionKind,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityReport {
    pub visible: bool,
}

async fn report_activity(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ActivityReport>,
) -> StatusCode {
    state.session_cache.record_activity(report.kind);
    StatusCode::NO_CONTENT
}

/// Becoming visible revalidates the session in the background.
async fn report_visibility(
    State(state): State<Arc<AppState>>,
    Json(report): Json<VisibilityReport>,
) -> StatusCode {
    tracing::debug!(visible = report.visible, "Visibility changed");
    state.session_cache.on_visibility_change(report.visible);
    StatusCode::NO_CONTENT
}
