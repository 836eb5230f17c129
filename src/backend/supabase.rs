// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase client for auth, table reads and remote procedures.
//!
//! Handles:
//! - Password sign-in, sign-up and sign-out
//! - The locally persisted session and its refresh when expired
//! - Auth-state change broadcast
//! - PostgREST table reads and RPC calls

use super::{procedures, tables, AuthApi, GroupApi, ProfileApi};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    ActivationReport, AdminAction, AdminActionResult, AdminRole, AuthChange, AuthEvent, Group,
    GroupFilter, Session, UserIdentity, UserMetadata, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Margin before access token expiration when we proactively refresh.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 10;
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const AUTH_EVENT_CAPACITY: usize = 16;

/// Supabase API client.
///
/// Cloning is cheap; clones share the persisted session and the event
/// channel.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    /// Locally persisted session (the browser client's storage slot).
    session: Arc<RwLock<Option<Session>>>,
    /// Bumped whenever the persisted session is cleared; a refresh started
    /// in an older generation is discarded.
    generation: Arc<AtomicU64>,
    /// Serializes refresh-token grants.
    refresh_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<AuthChange>,
}

impl SupabaseClient {
    /// Create a client for the configured project.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed building HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
            session: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            refresh_lock: Arc::new(Mutex::new(())),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Access token of the persisted session, if any.
    pub fn access_token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.access_token.clone())
    }

    /// Bearer for data requests: the user's token, else the anon key.
    fn bearer(&self) -> String {
        self.access_token().unwrap_or_else(|| self.anon_key.clone())
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // send() returns Err if there are no listeners yet.
        let _ = self.events.send(AuthChange { event, session });
    }

    fn persist(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Persist unless the session was cleared after `generation` was read.
    fn persist_if_current(&self, generation: u64, session: Session) -> bool {
        let mut slot = self.session.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = Some(session);
        true
    }

    // ─── Auth endpoints ──────────────────────────────────────────

    async fn token_grant<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;

        let token: TokenResponse = check_response_json(response).await?;
        Ok(token.into_session(Utc::now()))
    }

    /// Exchange the refresh token of the persisted session for a new one.
    async fn refresh_session(&self, generation: u64, stale: Session) -> Result<Option<Session>> {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we were waiting.
        let current = self.session.read().clone();
        if let Some(current) = current {
            if current.access_token != stale.access_token {
                return Ok(Some(current));
            }
        }

        let body = serde_json::json!({ "refresh_token": stale.refresh_token });
        match self.token_grant("refresh_token", &body).await {
            Ok(mut session) => {
                if session.user.is_none() {
                    session.user = stale.user.clone();
                }
                if !self.persist_if_current(generation, session.clone()) {
                    tracing::debug!("Session cleared during refresh, dropping refreshed token");
                    return Ok(None);
                }
                tracing::debug!("Session refreshed");
                self.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
                Ok(Some(session))
            }
            Err(e) if !e.is_transient() => {
                // The refresh token was revoked or already used: the session is gone.
                tracing::warn!(error = %e, "Refresh token rejected, dropping session");
                if self.generation() == generation {
                    self.clear_persisted_session();
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ─── REST helpers ────────────────────────────────────────────

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .query(query)
            .send()
            .await?;

        check_response_json(response).await
    }

    async fn rpc<B: Serialize + ?Sized>(&self, name: &str, args: &B) -> Result<serde_json::Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, name);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .json(args)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(backend_error(status.as_u16(), &body));
        }

        // Void procedures answer 204 with an empty body.
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid RPC response from {name}: {e}")))
    }
}

#[async_trait]
impl AuthApi for SupabaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({ "email": email, "password": password });
        let session = self.token_grant("password", &body).await?;

        self.persist(session.clone());
        tracing::info!(user_id = session.user_id().unwrap_or("<unknown>"), "Signed in");
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<Option<Session>> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": metadata,
        });

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let value: serde_json::Value = check_response_json(response).await?;

        // Projects with e-mail confirmation answer with the bare user.
        if value.get("access_token").is_none() {
            tracing::info!("Sign-up accepted, awaiting e-mail confirmation");
            return Ok(None);
        }

        let token: TokenResponse = serde_json::from_value(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid sign-up response: {e}")))?;
        let session = token.into_session(Utc::now());
        self.persist(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(access_token) = self.access_token() else {
            return Ok(());
        };

        let url = format!("{}/auth/v1/logout", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&access_token)
            .send()
            .await?;

        check_response(response).await?;
        self.clear_persisted_session();
        tracing::info!("Signed out");
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        let generation = self.generation();
        let current = self.session.read().clone();
        let Some(session) = current else {
            return Ok(None);
        };

        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if session.is_expired(Utc::now() + margin) {
            return self.refresh_session(generation, session).await;
        }
        Ok(Some(session))
    }

    async fn get_user(&self) -> Result<Option<UserIdentity>> {
        let Some(access_token) = self.access_token() else {
            return Ok(None);
        };

        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&access_token)
            .send()
            .await?;

        check_response_json(response).await.map(Some)
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<AuthChange>> {
        let receiver = self.events.subscribe();
        self.emit(AuthEvent::InitialSession, self.session.read().clone());
        Ok(receiver)
    }

    fn clear_persisted_session(&self) {
        let previous = {
            let mut slot = self.session.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if previous.is_some() {
            self.emit(AuthEvent::SignedOut, None);
        }
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/auth/v1/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .send()
            .await?;

        check_response(response).await
    }
}

#[async_trait]
impl ProfileApi for SupabaseClient {
    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile> {
        let rows: Vec<UserProfile> = self
            .select(
                tables::PROFILES,
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{user_id}")),
                ],
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Profile for user {}", user_id)))
    }

    async fn ensure_user_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        metadata: &UserMetadata,
    ) -> Result<()> {
        let args = serde_json::json!({
            "p_user_id": user_id,
            "p_email": email,
            "p_metadata": metadata,
        });
        self.rpc(procedures::ENSURE_USER_PROFILE, &args).await?;
        Ok(())
    }

    async fn fetch_admin_role(&self, user_id: &str) -> Result<Option<AdminRole>> {
        #[derive(Deserialize)]
        struct RoleRow {
            role: AdminRole,
        }

        let rows: Vec<RoleRow> = self
            .select(
                tables::ADMIN_USERS,
                &[
                    ("select", "role".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ],
            )
            .await?;

        Ok(rows.into_iter().next().map(|row| row.role))
    }
}

#[async_trait]
impl GroupApi for SupabaseClient {
    async fn activate_scheduled_groups(&self) -> Result<ActivationReport> {
        let value = self
            .rpc(procedures::ACTIVATE_SCHEDULED_GROUPS, &serde_json::json!({}))
            .await?;
        Ok(parse_activation_report(&value))
    }

    async fn fetch_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        let statuses = filter
            .statuses
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![
            ("select", "*".to_string()),
            ("status", format!("in.({statuses})")),
            (
                "scheduled_end",
                format!("gte.{}", crate::time_utils::format_utc_rfc3339(filter.ends_after)),
            ),
            ("order", "scheduled_start.asc".to_string()),
        ];
        if let Some(level) = filter.level {
            query.push(("level", format!("eq.{level}")));
        }

        self.select(tables::GROUPS, &query).await
    }

    async fn join_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let args = serde_json::json!({ "p_group_id": group_id, "p_user_id": user_id });
        let value = self.rpc(procedures::JOIN_GROUP, &args).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn admin_manage_group(
        &self,
        admin_id: &str,
        group_id: &str,
        action: AdminAction,
    ) -> Result<AdminActionResult> {
        let args = serde_json::json!({
            "p_admin_id": admin_id,
            "p_group_id": group_id,
            "p_action": action.as_str(),
        });
        let value = self.rpc(procedures::ADMIN_MANAGE_GROUP, &args).await?;

        // Table-returning functions answer with a one-row array.
        let row = match value {
            serde_json::Value::Array(rows) => rows.into_iter().next().unwrap_or_default(),
            other => other,
        };
        serde_json::from_value(row)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid admin action response: {e}")))
    }
}

/// Token grant / sign-up response from the auth service.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
    expires_at: Option<i64>,
    user: Option<UserIdentity>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at,
            user: self.user,
        }
    }
}

/// `activate_scheduled_groups` may answer with a bare count, an object or a
/// one-row table depending on how the function is declared.
fn parse_activation_report(value: &serde_json::Value) -> ActivationReport {
    let count = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::Object(obj) => obj.get("activated_count").and_then(|v| v.as_u64()),
        serde_json::Value::Array(rows) => rows
            .first()
            .and_then(|row| row.get("activated_count"))
            .and_then(|v| v.as_u64()),
        _ => None,
    };

    ActivationReport {
        activated_count: count.unwrap_or(0) as u32,
    }
}

/// Build an error from a non-success response, pulling the most specific
/// message field the services use.
fn backend_error(status: u16, body: &str) -> AppError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let code = json.get("code").and_then(|v| v.as_str()).map(str::to_string);
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
                .map(|msg| match code {
                    Some(code) if !msg.contains(&code) => format!("{code}: {msg}"),
                    _ => msg.to_string(),
                })
        })
        .unwrap_or_else(|| body.to_string());

    if status == 401 {
        tracing::debug!(error = %message, "Backend rejected credentials");
    }
    if status == 429 {
        tracing::warn!("Backend rate limit hit (429)");
    }

    AppError::Backend { status, message }
}

/// Check response status and return error if not successful.
async fn check_response(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(backend_error(status.as_u16(), &body))
}

/// Check response and parse JSON body.
async fn check_response_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(backend_error(status.as_u16(), &body));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON parse error: {}", e)))
}
