// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hadal_hub::backend::{AuthApi, GroupApi, ProfileApi, RealtimeApi, RealtimeEvent};
use hadal_hub::config::Config;
use hadal_hub::error::{AppError, Result};
use hadal_hub::models::{
    ActivationReport, AdminAction, AdminActionResult, AdminRole, AuthChange, AuthEvent,
    DebateTopic, EnglishLevel, Group, GroupFilter, GroupStatus, Session, UserIdentity,
    UserMetadata, UserProfile,
};
use hadal_hub::routes::create_router;
use hadal_hub::services::{AuthStateReconciler, ConfirmPrompt, Confirmer, SessionCache};
use hadal_hub::AppState;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct Calls {
    pub health_check: AtomicUsize,
    pub sign_in: AtomicUsize,
    pub sign_up: AtomicUsize,
    pub sign_out: AtomicUsize,
    pub get_session: AtomicUsize,
    pub get_user: AtomicUsize,
    pub subscribe_auth: AtomicUsize,
    pub fetch_profile: AtomicUsize,
    pub ensure_profile: AtomicUsize,
    pub fetch_admin_role: AtomicUsize,
    pub activate: AtomicUsize,
    pub fetch_groups: AtomicUsize,
    pub join_group: AtomicUsize,
    pub admin_manage: AtomicUsize,
    pub subscribe_groups: AtomicUsize,
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// In-memory backend implementing every backend trait, with call counters
/// and switches for injecting failures and latency.
pub struct MockBackend {
    pub calls: Calls,

    session: Mutex<Option<Session>>,
    pub session_delay: Mutex<Duration>,
    pub fail_get_session: AtomicBool,
    pub fail_get_user: AtomicBool,
    pub fail_health: AtomicBool,
    pub fail_sign_out: AtomicBool,
    pub fail_subscribe_auth: AtomicBool,
    pub cleared_persisted: AtomicUsize,
    auth_events: broadcast::Sender<AuthChange>,

    profiles: Mutex<HashMap<String, UserProfile>>,
    pub fail_fetch_profile: AtomicBool,
    pub fail_ensure_profile: AtomicBool,
    /// When false, ensure_user_profile succeeds without creating the row
    pub ensure_creates_row: AtomicBool,
    admin_roles: Mutex<HashMap<String, AdminRole>>,
    pub fail_admin_role: AtomicBool,

    groups: Mutex<Vec<Group>>,
    pub fetch_delay: Mutex<Duration>,
    pub activate_delay: Mutex<Duration>,
    pub fail_fetch_groups: AtomicBool,
    pub fail_activate: AtomicBool,
    pub fail_join: AtomicBool,
    pub last_filter: Mutex<Option<GroupFilter>>,

    realtime_tx: Mutex<Option<mpsc::Sender<RealtimeEvent>>>,
    pub fail_subscribe_groups: AtomicBool,
}

impl Default for MockBackend {
    fn default() -> Self {
        let (auth_events, _) = broadcast::channel(16);
        Self {
            calls: Calls::default(),
            session: Mutex::new(None),
            session_delay: Mutex::new(Duration::ZERO),
            fail_get_session: AtomicBool::new(false),
            fail_get_user: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            fail_subscribe_auth: AtomicBool::new(false),
            cleared_persisted: AtomicUsize::new(0),
            auth_events,
            profiles: Mutex::new(HashMap::new()),
            fail_fetch_profile: AtomicBool::new(false),
            fail_ensure_profile: AtomicBool::new(false),
            ensure_creates_row: AtomicBool::new(true),
            admin_roles: Mutex::new(HashMap::new()),
            fail_admin_role: AtomicBool::new(false),
            groups: Mutex::new(Vec::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            activate_delay: Mutex::new(Duration::ZERO),
            fail_fetch_groups: AtomicBool::new(false),
            fail_activate: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            last_filter: Mutex::new(None),
            realtime_tx: Mutex::new(None),
            fail_subscribe_groups: AtomicBool::new(false),
        }
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn set_session_delay(&self, delay: Duration) {
        *self.session_delay.lock() = delay;
    }

    pub fn emit(&self, change: AuthChange) {
        let _ = self.auth_events.send(change);
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }

    pub fn remove_profile(&self, user_id: &str) {
        self.profiles.lock().remove(user_id);
    }

    pub fn has_profile(&self, user_id: &str) -> bool {
        self.profiles.lock().contains_key(user_id)
    }

    pub fn set_admin_role(&self, user_id: &str, role: AdminRole) {
        self.admin_roles.lock().insert(user_id.to_string(), role);
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.lock().push(group);
    }

    pub fn group(&self, group_id: &str) -> Option<Group> {
        self.groups.lock().iter().find(|g| g.id == group_id).cloned()
    }

    pub fn update_group(&self, group_id: &str, update: impl FnOnce(&mut Group)) {
        if let Some(group) = self.groups.lock().iter_mut().find(|g| g.id == group_id) {
            update(group);
        }
    }

    /// Push a realtime event to the current subscriber. Returns false if
    /// nobody is subscribed.
    pub async fn push_realtime(&self, event: RealtimeEvent) -> bool {
        let tx = self.realtime_tx.lock().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn flag(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn network_error() -> AppError {
    AppError::Network("connection refused".to_string())
}

#[async_trait]
impl AuthApi for MockBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        Self::bump(&self.calls.sign_in);
        if password != "correct-horse" {
            return Err(AppError::Backend {
                status: 400,
                message: "invalid_grant: Invalid login credentials".to_string(),
            });
        }
        let mut session = test_session("user-1");
        if let Some(user) = session.user.as_mut() {
            user.email = Some(email.to_string());
        }
        self.set_session(Some(session.clone()));
        self.emit(AuthChange {
            event: AuthEvent::SignedIn,
            session: Some(session.clone()),
        });
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        metadata: &UserMetadata,
    ) -> Result<Option<Session>> {
        Self::bump(&self.calls.sign_up);
        if email.starts_with("taken@") {
            return Err(AppError::Backend {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        if email.starts_with("confirm@") {
            return Ok(None);
        }
        let mut session = test_session("user-new");
        if let Some(user) = session.user.as_mut() {
            user.email = Some(email.to_string());
            user.metadata = metadata.clone();
        }
        self.set_session(Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        Self::bump(&self.calls.sign_out);
        if Self::flag(&self.fail_sign_out) {
            return Err(network_error());
        }
        self.set_session(None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        Self::bump(&self.calls.get_session);
        // The answer is decided when the request is made, like a real
        // round-trip whose response is already on the wire.
        let session = self.session();
        let delay = *self.session_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::flag(&self.fail_get_session) {
            return Err(network_error());
        }
        Ok(session)
    }

    async fn get_user(&self) -> Result<Option<UserIdentity>> {
        Self::bump(&self.calls.get_user);
        if Self::flag(&self.fail_get_user) {
            return Err(network_error());
        }
        Ok(self.session().and_then(|s| s.user))
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<AuthChange>> {
        Self::bump(&self.calls.subscribe_auth);
        if Self::flag(&self.fail_subscribe_auth) {
            return Err(AppError::Internal(anyhow::anyhow!("listener unavailable")));
        }
        Ok(self.auth_events.subscribe())
    }

    fn clear_persisted_session(&self) {
        self.cleared_persisted.fetch_add(1, Ordering::SeqCst);
        self.set_session(None);
    }

    async fn health_check(&self) -> Result<()> {
        Self::bump(&self.calls.health_check);
        if Self::flag(&self.fail_health) {
            return Err(network_error());
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileApi for MockBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile> {
        Self::bump(&self.calls.fetch_profile);
        if Self::flag(&self.fail_fetch_profile) {
            return Err(network_error());
        }
        self.profiles
            .lock()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("profile {user_id}")))
    }

    async fn ensure_user_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        metadata: &UserMetadata,
    ) -> Result<()> {
        Self::bump(&self.calls.ensure_profile);
        if Self::flag(&self.fail_ensure_profile) {
            return Err(AppError::Backend {
                status: 500,
                message: "function ensure_user_profile failed".to_string(),
            });
        }
        if Self::flag(&self.ensure_creates_row) {
            let mut profiles = self.profiles.lock();
            profiles.entry(user_id.to_string()).or_insert_with(|| {
                let mut profile = test_profile(user_id, metadata.english_level.unwrap_or_default());
                profile.email = email.map(str::to_string);
                if let Some(name) = &metadata.display_name {
                    profile.display_name = name.clone();
                }
                profile
            });
        }
        Ok(())
    }

    async fn fetch_admin_role(&self, user_id: &str) -> Result<Option<AdminRole>> {
        Self::bump(&self.calls.fetch_admin_role);
        if Self::flag(&self.fail_admin_role) {
            return Err(network_error());
        }
        Ok(self.admin_roles.lock().get(user_id).copied())
    }
}

#[async_trait]
impl GroupApi for MockBackend {
    async fn activate_scheduled_groups(&self) -> Result<ActivationReport> {
        Self::bump(&self.calls.activate);
        let delay = *self.activate_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::flag(&self.fail_activate) {
            return Err(network_error());
        }
        let now = Utc::now();
        let mut activated = 0;
        for group in self.groups.lock().iter_mut().filter(|g| g.is_due(now)) {
            group.status = GroupStatus::Active;
            activated += 1;
        }
        Ok(ActivationReport {
            activated_count: activated,
        })
    }

    async fn fetch_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        Self::bump(&self.calls.fetch_groups);
        *self.last_filter.lock() = Some(filter.clone());
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::flag(&self.fail_fetch_groups) {
            return Err(network_error());
        }
        Ok(self
            .groups
            .lock()
            .iter()
            .filter(|g| filter.statuses.contains(&g.status))
            .filter(|g| filter.level.map_or(true, |level| g.level == level))
            .filter(|g| g.scheduled_end.map_or(true, |end| end >= filter.ends_after))
            .cloned()
            .collect())
    }

    async fn join_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        Self::bump(&self.calls.join_group);
        if Self::flag(&self.fail_join) {
            return Err(network_error());
        }
        let mut groups = self.groups.lock();
        let Some(group) = groups.iter_mut().find(|g| g.id == group_id) else {
            return Ok(false);
        };
        if group.is_full() || !matches!(group.status, GroupStatus::Waiting | GroupStatus::Active) {
            return Ok(false);
        }
        group.participants.insert(user_id.to_string());
        if group.is_full() {
            group.status = GroupStatus::Full;
        }
        Ok(true)
    }

    async fn admin_manage_group(
        &self,
        _admin_id: &str,
        group_id: &str,
        action: AdminAction,
    ) -> Result<AdminActionResult> {
        Self::bump(&self.calls.admin_manage);
        let mut groups = self.groups.lock();
        let Some(index) = groups.iter().position(|g| g.id == group_id) else {
            return Ok(AdminActionResult {
                success: false,
                message: "Group not found".to_string(),
            });
        };
        let message = match action {
            AdminAction::Close => "Group closed",
            AdminAction::Delete => "Group deleted",
            AdminAction::Extend => "Group extended",
        };
        match action {
            AdminAction::Close => groups[index].status = GroupStatus::Closed,
            AdminAction::Delete => {
                groups.remove(index);
            }
            AdminAction::Extend => {
                let group = &mut groups[index];
                group.scheduled_end = group.scheduled_end.map(|end| end + TimeDelta::minutes(30));
            }
        }
        Ok(AdminActionResult {
            success: true,
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl RealtimeApi for MockBackend {
    async fn subscribe_groups(&self) -> Result<mpsc::Receiver<RealtimeEvent>> {
        Self::bump(&self.calls.subscribe_groups);
        if Self::flag(&self.fail_subscribe_groups) {
            return Err(AppError::Realtime("connect failed".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.realtime_tx.lock() = Some(tx);
        Ok(rx)
    }
}

/// Confirmer that answers every prompt the same way and records them.
pub struct ScriptedConfirmer {
    answer: bool,
    pub prompts: Mutex<Vec<ConfirmPrompt>>,
}

impl ScriptedConfirmer {
    pub fn accept() -> Self {
        Self {
            answer: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn decline() -> Self {
        Self {
            answer: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        self.prompts.lock().push(prompt.clone());
        self.answer
    }
}

pub fn test_identity(user_id: &str) -> UserIdentity {
    UserIdentity {
        id: user_id.to_string(),
        email: Some(format!("{user_id}@example.com")),
        metadata: UserMetadata {
            display_name: Some("Ayaan".to_string()),
            english_level: Some(EnglishLevel::Intermediate),
            gender: None,
        },
    }
}

pub fn test_session(user_id: &str) -> Session {
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        token_type: "bearer".to_string(),
        expires_at: Utc::now() + TimeDelta::hours(1),
        user: Some(test_identity(user_id)),
    }
}

pub fn test_profile(user_id: &str, level: EnglishLevel) -> UserProfile {
    let now = Utc::now();
    UserProfile {
        id: user_id.to_string(),
        display_name: "Ayaan".to_string(),
        email: Some(format!("{user_id}@example.com")),
        english_level: level,
        current_streak: 3,
        longest_streak: 5,
        lessons_completed: 12,
        quizzes_completed: 4,
        created_at: now,
        updated_at: now,
    }
}

pub fn test_group(id: &str, level: EnglishLevel, status: GroupStatus) -> Group {
    let now = Utc::now();
    Group {
        id: id.to_string(),
        name: format!("Debate {id}"),
        level,
        status,
        participants: BTreeSet::new(),
        max_participants: 4,
        scheduled_start: Some(now - TimeDelta::minutes(5)),
        scheduled_end: Some(now + TimeDelta::hours(1)),
        activation_time: None,
        host_id: None,
        topic: Some(DebateTopic {
            title: "Should homework be banned?".to_string(),
            description: None,
        }),
    }
}

pub fn scheduled_group(id: &str, level: EnglishLevel, activation_time: DateTime<Utc>) -> Group {
    Group {
        activation_time: Some(activation_time),
        scheduled_start: Some(activation_time),
        ..test_group(id, level, GroupStatus::Scheduled)
    }
}

/// Cache and reconciler wired to a mock backend.
pub fn auth_stack(mock: &Arc<MockBackend>) -> (SessionCache, Arc<AuthStateReconciler>) {
    let cache = SessionCache::new(mock.clone(), mock.clone());
    let reconciler = AuthStateReconciler::new(
        mock.clone(),
        mock.clone(),
        cache.clone(),
        Duration::from_millis(3000),
    );
    (cache, reconciler)
}

/// Create a test app over the mock backend.
/// Returns the router and the shared state.
pub fn create_test_app(mock: &Arc<MockBackend>) -> (axum::Router, Arc<AppState>) {
    let (cache, reconciler) = auth_stack(mock);
    let state = Arc::new(AppState::new(Config::test_default(), cache, reconciler));
    (create_router(state.clone()), state)
}
