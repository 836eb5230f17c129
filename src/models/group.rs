//! Debate group model and realtime change records.

use super::profile::EnglishLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle status of a debate group.
///
/// Transitions are server-authoritative; the client only checks them to
/// flag anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Scheduled,
    Waiting,
    Active,
    Full,
    Closed,
}

impl GroupStatus {
    /// Statuses fetched for the group board.
    pub const BOARD: [GroupStatus; 3] = [
        GroupStatus::Waiting,
        GroupStatus::Active,
        GroupStatus::Scheduled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Scheduled => "scheduled",
            GroupStatus::Waiting => "waiting",
            GroupStatus::Active => "active",
            GroupStatus::Full => "full",
            GroupStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == GroupStatus::Closed
    }

    /// Whether `self → next` is a forward lifecycle move.
    pub fn can_transition_to(self, next: GroupStatus) -> bool {
        use GroupStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Scheduled, Waiting | Active) => true,
            (Waiting, Active) => true,
            (Waiting | Active, Full) => true,
            _ => false,
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debate topic attached to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTopic {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A debate room (`groups` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub level: EnglishLevel,
    pub status: GroupStatus,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    pub max_participants: u32,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Only set for scheduled groups
    #[serde(default)]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub topic: Option<DebateTopic>,
}

impl Group {
    /// A scheduled group whose activation time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == GroupStatus::Scheduled
            && self.activation_time.is_some_and(|at| at <= now)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() as u32 >= self.max_participants
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.contains(user_id)
    }

    /// Title shown in the join confirmation prompt.
    pub fn topic_title(&self) -> &str {
        self.topic
            .as_ref()
            .map(|t| t.title.as_str())
            .unwrap_or(self.name.as_str())
    }
}

/// Query filter for the group board fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFilter {
    pub statuses: Vec<GroupStatus>,
    /// `None` fetches every level (admin view)
    pub level: Option<EnglishLevel>,
    /// Only groups whose `scheduled_end` is at or after this instant
    pub ends_after: DateTime<Utc>,
}

impl GroupFilter {
    pub fn board(level: Option<EnglishLevel>, now: DateTime<Utc>) -> Self {
        Self {
            statuses: GroupStatus::BOARD.to_vec(),
            level,
            ends_after: now,
        }
    }
}

/// Result of the "activate due groups" procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub activated_count: u32,
}

/// Possibly partial group row carried by a realtime change.
///
/// Delete events usually only carry the primary key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroupRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub level: Option<EnglishLevel>,
    #[serde(default)]
    pub status: Option<GroupStatus>,
}

/// Row-level change on the `groups` table.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupChange {
    Insert(GroupRow),
    Update { old: GroupRow, new: GroupRow },
    Delete { old: GroupRow },
}

impl GroupChange {
    /// Levels the event carries. An update lists both sides, so a group
    /// moving between levels concerns viewers of either one.
    pub fn levels(&self) -> Vec<EnglishLevel> {
        let (first, second) = match self {
            GroupChange::Insert(row) | GroupChange::Delete { old: row } => (row, None),
            GroupChange::Update { old, new } => (new, Some(old)),
        };
        let mut levels = Vec::with_capacity(2);
        for level in std::iter::once(first).chain(second).filter_map(|row| row.level) {
            if !levels.contains(&level) {
                levels.push(level);
            }
        }
        levels
    }

    /// True for an update whose rows both carry a level and disagree.
    pub fn level_changed(&self) -> bool {
        match self {
            GroupChange::Update { old, new } => matches!(
                (old.level, new.level),
                (Some(before), Some(after)) if before != after
            ),
            _ => false,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            GroupChange::Insert(row) | GroupChange::Delete { old: row } => row.id.as_deref(),
            GroupChange::Update { old, new } => new.id.as_deref().or(old.id.as_deref()),
        }
    }

    /// `(old, new)` when an update carries a status change.
    pub fn status_transition(&self) -> Option<(Option<GroupStatus>, GroupStatus)> {
        match self {
            GroupChange::Update { old, new } => match new.status {
                Some(next) if old.status != Some(next) => Some((old.status, next)),
                _ => None,
            },
            _ => None,
        }
    }
}
