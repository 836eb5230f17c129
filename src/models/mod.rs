// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod admin;
pub mod group;
pub mod notice;
pub mod profile;
pub mod session;

pub use admin::{AdminAction, AdminActionResult, AdminRole};
pub use group::{
    ActivationReport, DebateTopic, Group, GroupChange, GroupFilter, GroupRow, GroupStatus,
};
pub use notice::{Notice, NoticeKind};
pub use profile::{EnglishLevel, SignInForm, SignUpForm, UserProfile};
pub use session::{AuthChange, AuthEvent, Gender, Session, UserIdentity, UserMetadata};
