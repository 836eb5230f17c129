// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent diagnostics responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the backend adapters and services.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// PostgREST code returned by `.single()` style lookups that matched no row.
    pub const NO_ROWS_CODE: &'static str = "PGRST116";

    /// Returns true for "row not found" style failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::NotFound(_) => true,
            AppError::Backend { status, message } => {
                *status == 404 || message.contains(Self::NO_ROWS_CODE)
            }
            _ => false,
        }
    }

    /// Returns true for failures that a retry or a cached value can paper over.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout | AppError::Realtime(_) => true,
            AppError::Backend { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout
        } else if err.is_decode() {
            AppError::Internal(anyhow::anyhow!("Failed to decode backend response: {}", err))
        } else {
            AppError::Network(err.to_string())
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::Network(msg) | AppError::Realtime(msg) => {
                (StatusCode::BAD_GATEWAY, "backend_unreachable", Some(msg.clone()))
            }
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),
            AppError::Backend { status, message } => {
                tracing::warn!(status, error = %message, "Backend error");
                (StatusCode::BAD_GATEWAY, "backend_error", Some(message.clone()))
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Short, user-facing reason a sign-in or sign-up attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    AlreadyRegistered,

    #[error("Password must be at least 6 characters")]
    WeakPassword,

    #[error("Please confirm your email before signing in")]
    EmailNotConfirmed,

    #[error("Too many attempts. Please wait a moment and try again")]
    RateLimited,

    #[error("Can't reach the server. Check your connection and try again")]
    Network,

    /// Form input rejected before reaching the backend
    #[error("{0}")]
    Invalid(String),

    #[error("Something went wrong. Please try again")]
    Unknown,
}

impl AuthFailure {
    /// Map a backend error to the message shown next to the form.
    pub fn from_backend(err: &AppError) -> Self {
        match err {
            AppError::Network(_) | AppError::Timeout => AuthFailure::Network,
            AppError::Backend { status, message } => {
                let message = message.to_lowercase();
                if message.contains("invalid login credentials")
                    || message.contains("invalid_credentials")
                    || message.contains("invalid_grant")
                {
                    AuthFailure::InvalidCredentials
                } else if message.contains("already registered")
                    || message.contains("already exists")
                    || message.contains("user_already_exists")
                {
                    AuthFailure::AlreadyRegistered
                } else if message.contains("weak_password")
                    || message.contains("password should be")
                    || message.contains("at least 6")
                {
                    AuthFailure::WeakPassword
                } else if message.contains("email not confirmed")
                    || message.contains("email_not_confirmed")
                {
                    AuthFailure::EmailNotConfirmed
                } else if *status == 429 || message.contains("rate limit") {
                    AuthFailure::RateLimited
                } else {
                    AuthFailure::Unknown
                }
            }
            _ => AuthFailure::Unknown,
        }
    }

    /// First validation message, by field name for a stable choice.
    pub fn from_validation(errors: &validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
            .iter()
            .find_map(|(_, errs)| {
                errs.iter()
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            })
            .map(AuthFailure::Invalid)
            .unwrap_or(AuthFailure::Unknown)
    }
}

/// Result type alias for backend calls and handlers
pub type Result<T> = std::result::Result<T, AppError>;

