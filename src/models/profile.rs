//! Learner profile model and the sign-in / sign-up forms.

use super::session::{Gender, UserIdentity, UserMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// English proficiency level, shared by profiles and debate groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnglishLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl EnglishLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EnglishLevel::Beginner => "beginner",
            EnglishLevel::Intermediate => "intermediate",
            EnglishLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for EnglishLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level profile row (`profiles` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Same id as the auth user
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub english_level: EnglishLevel,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub lessons_completed: u32,
    #[serde(default)]
    pub quizzes_completed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Build the minimal fallback profile used when the profile row cannot be
    /// fetched or created, so the UI never waits on it.
    pub fn synthesize(identity: &UserIdentity, now: DateTime<Utc>) -> Self {
        let display_name = identity
            .metadata
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                identity
                    .email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Learner".to_string());

        Self {
            id: identity.id.clone(),
            display_name,
            email: identity.email.clone(),
            english_level: identity.metadata.english_level.unwrap_or_default(),
            current_streak: 0,
            longest_streak: 0,
            lessons_completed: 0,
            quizzes_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sign-in form input.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignInForm {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Please enter your password"))]
    pub password: String,
}

/// Sign-up form input.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpForm {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 50, message = "Display name must be 1-50 characters"))]
    pub display_name: String,
    pub english_level: EnglishLevel,
    pub gender: Option<Gender>,
}

impl SignUpForm {
    /// Metadata stored on the auth user and used by the profile trigger.
    pub fn metadata(&self) -> UserMetadata {
        UserMetadata {
            display_name: Some(self.display_name.trim().to_string()),
            english_level: Some(self.english_level),
            gender: self.gender,
        }
    }
}
