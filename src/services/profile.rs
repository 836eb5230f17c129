//! Ensure-exists resolution of the learner profile.

use super::session_cache::SessionCache;
use crate::backend::ProfileApi;
use crate::models::{UserIdentity, UserProfile};
use chrono::Utc;
use std::sync::Arc;

/// Resolves a profile for an identity, creating the row when missing.
#[derive(Clone)]
pub struct ProfileResolver {
    cache: SessionCache,
    profiles: Arc<dyn ProfileApi>,
}

impl ProfileResolver {
    pub fn new(cache: SessionCache, profiles: Arc<dyn ProfileApi>) -> Self {
        Self { cache, profiles }
    }

    /// Never fails: fetch, else create and re-fetch, else synthesize a
    /// minimal profile from the identity. The synthesized profile is not
    /// cached so a later fetch can replace it.
    pub async fn ensure_profile(&self, identity: &UserIdentity) -> UserProfile {
        if let Some(profile) = self.cache.get_user_profile(&identity.id).await {
            return profile;
        }

        match self
            .profiles
            .ensure_user_profile(&identity.id, identity.email.as_deref(), &identity.metadata)
            .await
        {
            Ok(()) => {
                if let Some(profile) = self.cache.get_user_profile(&identity.id).await {
                    tracing::info!(user_id = %identity.id, "Created missing profile");
                    return profile;
                }
                tracing::warn!(user_id = %identity.id, "Profile created but not readable");
            }
            Err(e) => {
                tracing::warn!(user_id = %identity.id, error = %e, "Could not create profile");
            }
        }

        tracing::info!(user_id = %identity.id, "Using synthesized profile");
        UserProfile::synthesize(identity, Utc::now())
    }
}
