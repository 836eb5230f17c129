//! Admin roles and lifecycle actions on debate groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role stored in `admin_users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    Moderator,
    Admin,
    SuperAdmin,
}

impl AdminRole {
    /// Whether the role may run `action`. Moderators can close and extend
    /// groups but not delete them.
    pub fn permits(self, action: AdminAction) -> bool {
        match action {
            AdminAction::Close | AdminAction::Extend => true,
            AdminAction::Delete => matches!(self, AdminRole::Admin | AdminRole::SuperAdmin),
        }
    }
}

/// Lifecycle action an admin can take on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminAction {
    Close,
    Delete,
    Extend,
}

impl AdminAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminAction::Close => "close",
            AdminAction::Delete => "delete",
            AdminAction::Extend => "extend",
        }
    }

    pub fn is_irreversible(self) -> bool {
        self == AdminAction::Delete
    }

    /// Confirmation text shown before the action is sent.
    pub fn prompt(self, group_name: &str) -> String {
        match self {
            AdminAction::Close => format!("Close \"{group_name}\"? Participants will be removed."),
            AdminAction::Delete => format!(
                "Permanently delete \"{group_name}\" and all of its messages? This cannot be undone."
            ),
            AdminAction::Extend => format!("Extend the scheduled end of \"{group_name}\"?"),
        }
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the `admin_manage_group` procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}
