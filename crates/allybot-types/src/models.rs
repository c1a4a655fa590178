use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChannelId, CommunityId, MessageId, UserId};

/// Lifecycle of an alliance application. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub community_id: CommunityId,
    pub applicant_id: UserId,
    /// Always lowercase.
    pub username: String,
    pub alliance: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub community_id: CommunityId,
    pub emoji: String,
    pub role_name: String,
}

/// The one message per community whose reactions are read as role requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMessage {
    pub community_id: CommunityId,
    pub channel_id: Option<ChannelId>,
    pub message_id: MessageId,
}

/// Result of upserting a role binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Created,
    Replaced,
}

/// Result of removing a role binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindOutcome {
    Removed,
    NotFound,
}

/// Result of an application submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(ApplicationRecord),
    AlreadyPending(ApplicationRecord),
    RejectedBlocked,
    AlreadyApproved(ApplicationRecord),
    DuplicateUsername,
}

/// Result of a compare-and-set transition out of `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(ApplicationRecord),
    /// The record was no longer pending when the update ran.
    NotPending,
    /// Approving would give two approved records the same username.
    UsernameTaken,
}

/// Per-record results of approving every pending application of an alliance.
#[derive(Debug, Clone, Default)]
pub struct BatchApproval {
    pub approved: Vec<ApplicationRecord>,
    pub failed: Vec<(ApplicationRecord, String)>,
}

/// Longest game username accepted in commands.
pub const MAX_USERNAME_LEN: usize = 32;

/// Platform limit on member nicknames, in characters.
pub const MAX_NICKNAME_LEN: usize = 32;

/// Applies the `[ALLIANCE] username` display format used after approval,
/// cut to the nickname limit.
pub fn member_display_name(alliance: &str, username: &str) -> String {
    format!("[{}] {}", alliance, username)
        .chars()
        .take(MAX_NICKNAME_LEN)
        .collect()
}

/// Lowercases and trims a game username so lookups are case-insensitive.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_parse_back() {
        for status in [
            ApplicationStatus::Pending,
            ApplicationStatus::Approved,
            ApplicationStatus::Rejected,
        ] {
            assert_eq!(ApplicationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApplicationStatus::parse("withdrawn"), None);
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!ApplicationStatus::Pending.is_terminal());
        assert!(ApplicationStatus::Approved.is_terminal());
        assert!(ApplicationStatus::Rejected.is_terminal());
    }

    #[test]
    fn usernames_are_normalized() {
        assert_eq!(normalize_username("  BoB "), "bob");
        assert_eq!(member_display_name("NONA", "bob"), "[NONA] bob");
    }

    #[test]
    fn display_names_are_cut_to_the_nickname_limit() {
        let name = member_display_name("NONA", &"é".repeat(MAX_USERNAME_LEN));
        assert_eq!(name.chars().count(), MAX_NICKNAME_LEN);
        assert!(name.starts_with("[NONA] é"));
    }
}
