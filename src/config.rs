// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! The backend URL and public API key are mandatory; everything else has a
//! default tuned for the web client.

use std::env;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend project (e.g. `https://xyz.supabase.co`)
    pub supabase_url: String,
    /// Public (anon) API key sent with every backend request
    pub supabase_anon_key: String,
    /// Port for the local diagnostics endpoint
    pub diagnostics_port: u16,
    /// How often scheduled groups are activated and the board re-fetched
    pub group_poll_interval: Duration,
    /// Upper bound for the startup session validation
    pub session_validate_timeout: Duration,
    /// How often the session is revalidated in the background
    pub background_refresh_interval: Duration,
    /// Whether to open the realtime group subscription
    pub realtime_enabled: bool,
    /// Optional account for unattended sign-in at startup
    pub sign_in: Option<Credentials>,
}

/// E-mail and password for unattended sign-in.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            diagnostics_port: 8080,
            group_poll_interval: Duration::from_secs(5),
            session_validate_timeout: Duration::from_millis(3000),
            background_refresh_interval: Duration::from_secs(60),
            realtime_enabled: false,
            sign_in: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let supabase_url = required("SUPABASE_URL")?;
        let parsed = reqwest::Url::parse(&supabase_url)
            .map_err(|e| ConfigError::Invalid("SUPABASE_URL", e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "SUPABASE_URL",
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            diagnostics_port: parse_or("DIAGNOSTICS_PORT", 8080),
            group_poll_interval: Duration::from_secs(nonzero_or("GROUP_POLL_INTERVAL_SECS", 5)?),
            session_validate_timeout: Duration::from_millis(nonzero_or(
                "SESSION_VALIDATE_TIMEOUT_MS",
                3000,
            )?),
            background_refresh_interval: Duration::from_secs(nonzero_or(
                "BACKGROUND_REFRESH_SECS",
                60,
            )?),
            realtime_enabled: parse_or("REALTIME_ENABLED", true),
            sign_in: optional("HADAL_EMAIL")
                .zip(optional("HADAL_PASSWORD"))
                .map(|(email, password)| Credentials { email, password }),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Intervals and timeouts drive tokio timers, which reject a zero period.
fn nonzero_or(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match parse_or(name, default) {
        0 => Err(ConfigError::Invalid(name, "must be greater than zero".to_string())),
        value => Ok(value),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
