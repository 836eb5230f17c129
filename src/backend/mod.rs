//! Remote backend layer.
//!
//! The traits here are the seams between the client core and the hosted
//! backend: auth, profile rows, group rows/procedures and realtime changes.
//! Backed by the Supabase HTTP/WebSocket APIs in production and an in-memory
//! mock in tests.

pub mod realtime;
pub mod supabase;

pub use realtime::SupabaseRealtime;
pub use supabase::SupabaseClient;

use crate::error::Result;
use crate::models::{
    ActivationReport, AdminAction, AdminActionResult, AdminRole, AuthChange, Group, GroupChange,
    GroupFilter, Session, UserIdentity, UserMetadata, UserProfile,
};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

/// Table names as constants.
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const GROUPS: &str = "groups";
    pub const ADMIN_USERS: &str = "admin_users";
}

/// Remote procedure names as constants.
pub mod procedures {
    pub const ENSURE_USER_PROFILE: &str = "ensure_user_profile";
    pub const ACTIVATE_SCHEDULED_GROUPS: &str = "activate_scheduled_groups";
    pub const JOIN_GROUP: &str = "join_group";
    pub const ADMIN_MANAGE_GROUP: &str = "admin_manage_group";
}

/// Remote authentication service.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Returns `None` when the account needs e-mail confirmation first.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<Option<Session>>;

    async fn sign_out(&self) -> Result<()>;

    /// Current session, refreshed with the refresh token when expired.
    async fn get_session(&self) -> Result<Option<Session>>;

    async fn get_user(&self) -> Result<Option<UserIdentity>>;

    /// Register for auth-state changes. The first event delivered is an
    /// `INITIAL_SESSION` replay.
    fn subscribe(&self) -> Result<broadcast::Receiver<AuthChange>>;

    /// Drop the locally persisted session without calling the service.
    fn clear_persisted_session(&self);

    /// Cheap reachability check.
    async fn health_check(&self) -> Result<()>;
}

/// Profile rows and related procedures.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Missing rows are reported as `AppError::NotFound`.
    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile>;

    /// Idempotent create-if-absent.
    async fn ensure_user_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        metadata: &UserMetadata,
    ) -> Result<()>;

    async fn fetch_admin_role(&self, user_id: &str) -> Result<Option<AdminRole>>;
}

/// Debate group rows and lifecycle procedures.
#[async_trait]
pub trait GroupApi: Send + Sync {
    async fn activate_scheduled_groups(&self) -> Result<ActivationReport>;

    async fn fetch_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>>;

    async fn join_group(&self, group_id: &str, user_id: &str) -> Result<bool>;

    async fn admin_manage_group(
        &self,
        admin_id: &str,
        group_id: &str,
        action: AdminAction,
    ) -> Result<AdminActionResult>;
}

/// Events delivered by a realtime group subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change(GroupChange),
    /// The channel ended; the subscriber should resubscribe.
    Closed(String),
}

/// Push channel for row-level changes on the `groups` table.
#[async_trait]
pub trait RealtimeApi: Send + Sync {
    /// Resolves once the channel join is acknowledged.
    async fn subscribe_groups(&self) -> Result<mpsc::Receiver<RealtimeEvent>>;
}
