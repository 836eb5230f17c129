// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Debate group lifecycle: activation polling, countdowns, realtime
//! changes, join and admin actions.
//!
//! Local group state is only ever replaced by a full re-fetch, and every
//! re-fetch goes through [`GroupLifecycleController::request_reconciliation`],
//! which coalesces overlapping requests into at most one follow-up fetch.

use super::backoff::Backoff;
use super::countdown::{Countdown, CountdownTick};
use super::ttl_cache::SingleFlight;
use crate::backend::{GroupApi, ProfileApi, RealtimeApi, RealtimeEvent};
use crate::config::Config;
use crate::models::{
    AdminAction, AdminRole, EnglishLevel, Group, GroupChange, GroupFilter, GroupStatus, Notice,
    UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a second activation request waits for the one in flight.
const ACTIVATION_WAIT: Duration = Duration::from_secs(10);

/// Who is looking at the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub level: EnglishLevel,
    pub role: Option<AdminRole>,
}

impl Viewer {
    /// Build the viewer for a profile. The admin role lookup fails closed.
    pub async fn resolve(profile: &UserProfile, profiles: &dyn ProfileApi) -> Self {
        let role = match profiles.fetch_admin_role(&profile.id).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(
                    user_id = %profile.id,
                    error = %e,
                    "Admin role lookup failed, treating as non-admin"
                );
                None
            }
        };

        Self {
            user_id: profile.id.clone(),
            level: profile.english_level,
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_some()
    }

    /// Level filter for the board fetch; admins see every level.
    pub fn board_level(&self) -> Option<EnglishLevel> {
        if self.is_admin() {
            None
        } else {
            Some(self.level)
        }
    }

    /// Whether a change touching `levels` concerns this viewer.
    /// Events without a level are treated as relevant.
    pub fn can_see(&self, levels: &[EnglishLevel]) -> bool {
        self.is_admin() || levels.is_empty() || levels.contains(&self.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    Initial,
    Poll,
    Countdown,
    Realtime,
    Join,
    AdminAction,
}

/// Published group state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupBoard {
    pub groups: Vec<Group>,
    /// Result of the last join or admin action, until dismissed
    pub notice: Option<Notice>,
    /// Set while the board could not be refreshed
    pub sync_error: Option<Notice>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Where the UI goes after a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoute {
    pub group_id: String,
}

impl ChatRoute {
    pub fn path(&self) -> String {
        format!("/debate/{}", self.group_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub message: String,
    /// Irreversible actions are styled as destructive
    pub destructive: bool,
}

/// Asks the user to confirm an action.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Cancelled,
    Entered(ChatRoute),
    Failed(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    Cancelled,
    Denied(Notice),
    Completed(String),
    Failed(Notice),
}

/// Loop intervals for the background tasks.
#[derive(Debug, Clone)]
pub struct GroupTimings {
    pub poll_interval: Duration,
    pub countdown_tick: Duration,
    pub realtime_backoff: Backoff,
}

impl Default for GroupTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            countdown_tick: Duration::from_secs(1),
            realtime_backoff: Backoff::realtime(),
        }
    }
}

impl GroupTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.group_poll_interval,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct ReconcileState {
    in_flight: bool,
    pending: bool,
}

/// Clears the in-flight flag if a reconciliation is dropped mid-fetch.
struct InFlight<'a> {
    state: &'a Mutex<ReconcileState>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.in_flight = false;
            state.pending = false;
        }
    }
}

pub struct GroupLifecycleController {
    api: Arc<dyn GroupApi>,
    realtime: Option<Arc<dyn RealtimeApi>>,
    viewer: Viewer,
    board: watch::Sender<GroupBoard>,
    reconcile: Mutex<ReconcileState>,
    activation: Arc<SingleFlight>,
    countdowns: DashMap<String, Countdown>,
    timings: GroupTimings,
}

impl GroupLifecycleController {
    pub fn new(
        api: Arc<dyn GroupApi>,
        realtime: Option<Arc<dyn RealtimeApi>>,
        viewer: Viewer,
        timings: GroupTimings,
    ) -> Arc<Self> {
        let (board, _) = watch::channel(GroupBoard::default());
        Arc::new(Self {
            api,
            realtime,
            viewer,
            board,
            reconcile: Mutex::new(ReconcileState::default()),
            activation: Arc::new(SingleFlight::new()),
            countdowns: DashMap::new(),
            timings,
        })
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn subscribe(&self) -> watch::Receiver<GroupBoard> {
        self.board.subscribe()
    }

    pub fn board(&self) -> GroupBoard {
        self.board.borrow().clone()
    }

    pub fn dismiss_notice(&self) {
        self.board.send_modify(|b| b.notice = None);
    }

    /// Re-fetch the board, coalescing with any fetch already running.
    ///
    /// Returns false when the request was folded into an in-flight fetch;
    /// that fetch runs once more before it finishes.
    pub async fn request_reconciliation(&self, trigger: ReconcileTrigger) -> bool {
        {
            let mut state = self.reconcile.lock();
            if state.in_flight {
                state.pending = true;
                tracing::debug!(?trigger, "Reconciliation coalesced");
                return false;
            }
            state.in_flight = true;
        }

        let mut lease = InFlight {
            state: &self.reconcile,
            armed: true,
        };
        loop {
            self.refresh(trigger).await;

            let again = {
                let mut state = self.reconcile.lock();
                if state.pending {
                    state.pending = false;
                    true
                } else {
                    state.in_flight = false;
                    false
                }
            };
            if !again {
                lease.armed = false;
                return true;
            }
            tracing::debug!(?trigger, "Running coalesced reconciliation");
        }
    }

    async fn refresh(&self, trigger: ReconcileTrigger) {
        let now = Utc::now();
        let filter = GroupFilter::board(self.viewer.board_level(), now);
        match self.api.fetch_groups(&filter).await {
            Ok(groups) => {
                tracing::debug!(?trigger, count = groups.len(), "Group board refreshed");
                self.sync_countdowns(&groups);
                self.board.send_modify(|b| {
                    b.groups = groups;
                    b.sync_error = None;
                    b.last_refreshed = Some(now);
                });
            }
            Err(e) => {
                tracing::warn!(?trigger, error = %e, "Group fetch failed");
                self.board.send_modify(|b| {
                    b.sync_error = Some(Notice::retryable(
                        "Couldn't refresh groups. Retrying shortly.",
                    ));
                });
            }
        }
    }

    /// Keep one countdown per scheduled group on the board.
    fn sync_countdowns(&self, groups: &[Group]) {
        let mut scheduled = HashSet::new();
        for group in groups {
            let (GroupStatus::Scheduled, Some(at)) = (group.status, group.activation_time) else {
                continue;
            };
            scheduled.insert(group.id.as_str());
            self.countdowns
                .entry(group.id.clone())
                .and_modify(|c| {
                    if c.activation_time() != at {
                        c.reschedule(at);
                    }
                })
                .or_insert_with(|| Countdown::new(at));
        }
        self.countdowns.retain(|id, _| scheduled.contains(id.as_str()));
    }

    /// Advance every countdown, returning the groups that fired.
    pub fn tick_countdowns(&self, now: DateTime<Utc>) -> Vec<String> {
        self.countdowns
            .iter_mut()
            .filter_map(|mut entry| {
                (entry.value_mut().tick(now) == CountdownTick::Fire).then(|| entry.key().clone())
            })
            .collect()
    }

    pub fn countdown_label(&self, group_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.countdowns.get(group_id).map(|c| c.label(now))
    }

    /// One activation RPC at a time. A caller that finds one in flight
    /// waits for it instead of issuing its own.
    async fn activate_due_groups(&self) {
        let Some(_flight) = self.activation.try_claim() else {
            tracing::debug!("Activation already in flight, joining it");
            self.activation.wait_idle(ACTIVATION_WAIT).await;
            return;
        };

        match self.api.activate_scheduled_groups().await {
            Ok(report) if report.activated_count > 0 => {
                tracing::info!(
                    activated_count = report.activated_count,
                    "Activated scheduled groups"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Group activation failed"),
        }
    }

    /// Activate due groups, then re-fetch regardless of the outcome.
    pub async fn poll_activation(&self) {
        self.activate_due_groups().await;
        self.request_reconciliation(ReconcileTrigger::Poll).await;
    }

    pub async fn on_countdown_complete(&self, group_id: &str) {
        tracing::info!(group_id = %group_id, "Countdown reached zero, activating");
        self.activate_due_groups().await;
        self.request_reconciliation(ReconcileTrigger::Countdown).await;
    }

    /// Apply one realtime change. Returns true if it triggered a re-fetch.
    pub async fn handle_change(&self, change: GroupChange) -> bool {
        if !self.viewer.can_see(&change.levels()) {
            tracing::trace!(group_id = ?change.group_id(), "Ignoring change for other level");
            return false;
        }

        let relevant = match &change {
            GroupChange::Insert(_) | GroupChange::Delete { .. } => true,
            GroupChange::Update { .. } => match change.status_transition() {
                Some((old, new)) => {
                    if old.is_some_and(|old| !old.can_transition_to(new)) {
                        tracing::warn!(
                            group_id = ?change.group_id(),
                            from = ?old,
                            to = %new,
                            "Server reported a backward status transition"
                        );
                    }
                    true
                }
                None => change.level_changed(),
            },
        };

        if relevant {
            self.request_reconciliation(ReconcileTrigger::Realtime).await;
        }
        relevant
    }

    /// Keep a realtime subscription open, reconnecting with backoff until
    /// the failure budget is spent.
    pub async fn run_realtime(self: Arc<Self>) {
        let Some(realtime) = self.realtime.clone() else {
            tracing::debug!("Realtime disabled, relying on polling");
            return;
        };
        let mut backoff = self.timings.realtime_backoff.clone();

        loop {
            match realtime.subscribe_groups().await {
                Ok(mut events) => {
                    backoff.reset();
                    // Catch up on anything missed while disconnected.
                    self.request_reconciliation(ReconcileTrigger::Realtime).await;
                    while let Some(event) = events.recv().await {
                        match event {
                            RealtimeEvent::Change(change) => {
                                self.handle_change(change).await;
                            }
                            RealtimeEvent::Closed(reason) => {
                                tracing::warn!(reason = %reason, "Realtime subscription closed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Realtime subscription failed"),
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    failures = backoff.failures(),
                    "Giving up on realtime updates, polling continues"
                );
                self.board.send_modify(|b| {
                    b.notice = Some(Notice::info(
                        "Live updates are paused. The list still refreshes every few seconds.",
                    ));
                });
                return;
            };
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.failures(),
                "Retrying realtime subscription"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn run_poller(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.timings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_activation().await;
        }
    }

    pub async fn run_countdowns(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.timings.countdown_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for group_id in self.tick_countdowns(Utc::now()) {
                self.on_countdown_complete(&group_id).await;
            }
        }
    }

    /// Spawn the poller, countdown ticker and realtime loop.
    pub fn start(self: Arc<Self>) -> GroupTasks {
        tracing::info!(
            user_id = %self.viewer.user_id,
            level = %self.viewer.level,
            admin = self.viewer.is_admin(),
            "Starting group lifecycle"
        );
        GroupTasks {
            poller: tokio::spawn(Arc::clone(&self).run_poller()),
            countdowns: tokio::spawn(Arc::clone(&self).run_countdowns()),
            realtime: tokio::spawn(self.run_realtime()),
        }
    }

    fn find_group(&self, group_id: &str) -> Option<Group> {
        self.board
            .borrow()
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
    }

    fn publish_notice(&self, notice: Notice) -> Notice {
        self.board.send_modify(|b| b.notice = Some(notice.clone()));
        notice
    }

    /// Join after the user confirms the topic prompt.
    pub async fn join_group(&self, group_id: &str, confirmer: &dyn Confirmer) -> JoinOutcome {
        let Some(group) = self.find_group(group_id) else {
            return JoinOutcome::Failed(
                self.publish_notice(Notice::error("This group is no longer available.")),
            );
        };

        if group.has_participant(&self.viewer.user_id) {
            return JoinOutcome::Entered(ChatRoute {
                group_id: group.id,
            });
        }

        let prompt = ConfirmPrompt {
            title: format!("Join \"{}\"?", group.name),
            message: format!("Today's topic: {}", group.topic_title()),
            destructive: false,
        };
        if !confirmer.confirm(&prompt).await {
            tracing::debug!(group_id = %group.id, "Join cancelled");
            return JoinOutcome::Cancelled;
        }

        match self.api.join_group(&group.id, &self.viewer.user_id).await {
            Ok(true) => {
                tracing::info!(group_id = %group.id, user_id = %self.viewer.user_id, "Joined group");
                self.request_reconciliation(ReconcileTrigger::Join).await;
                JoinOutcome::Entered(ChatRoute {
                    group_id: group.id,
                })
            }
            Ok(false) => {
                tracing::info!(group_id = %group.id, "Join refused");
                JoinOutcome::Failed(self.publish_notice(Notice::error(
                    "This group is full or no longer accepting participants.",
                )))
            }
            Err(e) => {
                tracing::warn!(group_id = %group.id, error = %e, "Join failed");
                JoinOutcome::Failed(self.publish_notice(Notice::retryable(
                    "Couldn't join the group. Please try again.",
                )))
            }
        }
    }

    /// Run an admin action after confirmation. Denied without an admin role.
    pub async fn admin_action(
        &self,
        group_id: &str,
        action: AdminAction,
        confirmer: &dyn Confirmer,
    ) -> AdminOutcome {
        let permitted = self.viewer.role.is_some_and(|role| role.permits(action));
        if !permitted {
            tracing::warn!(
                user_id = %self.viewer.user_id,
                action = %action,
                "Admin action denied"
            );
            return AdminOutcome::Denied(self.publish_notice(Notice::error(
                "You don't have permission to do that.",
            )));
        }

        let name = self
            .find_group(group_id)
            .map(|g| g.name)
            .unwrap_or_else(|| group_id.to_string());
        let prompt = ConfirmPrompt {
            title: format!("{} group", capitalize(action.as_str())),
            message: action.prompt(&name),
            destructive: action.is_irreversible(),
        };
        if !confirmer.confirm(&prompt).await {
            return AdminOutcome::Cancelled;
        }

        match self
            .api
            .admin_manage_group(&self.viewer.user_id, group_id, action)
            .await
        {
            Ok(result) if result.success => {
                tracing::info!(group_id = %group_id, action = %action, "Admin action applied");
                self.request_reconciliation(ReconcileTrigger::AdminAction).await;
                AdminOutcome::Completed(result.message)
            }
            Ok(result) => {
                tracing::warn!(
                    group_id = %group_id,
                    action = %action,
                    message = %result.message,
                    "Admin action rejected"
                );
                let message = if result.message.is_empty() {
                    format!("Couldn't {action} the group.")
                } else {
                    result.message
                };
                AdminOutcome::Failed(self.publish_notice(Notice::error(message)))
            }
            Err(e) => {
                tracing::warn!(group_id = %group_id, action = %action, error = %e, "Admin action failed");
                AdminOutcome::Failed(self.publish_notice(Notice::retryable(format!(
                    "Couldn't {action} the group. Please try again."
                ))))
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Handles for the background loops started by
/// [`GroupLifecycleController::start`]. The loops stop when this is dropped.
pub struct GroupTasks {
    poller: JoinHandle<()>,
    countdowns: JoinHandle<()>,
    realtime: JoinHandle<()>,
}

impl GroupTasks {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for GroupTasks {
    fn drop(&mut self) {
        self.poller.abort();
        self.countdowns.abort();
        self.realtime.abort();
    }
}
