use std::fmt;

use futures_util::future::BoxFuture;
use thiserror::Error;

use allybot_types::events::Interaction;
use allybot_types::{ChannelId, CommunityId, MessageId, UserId};

/// Failures reported by the chat platform (or any other remote service).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The role, channel or member no longer exists
    #[error("{0} not found")]
    NotFound(String),

    /// The bot lacks a platform permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Timeouts, 5xx responses, rate limits, transport errors
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Where a plain message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Channel(ChannelId),
    /// Direct message to a member
    User(UserId),
}

impl fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel {}", id),
            Self::User(id) => write!(f, "user {}", id),
        }
    }
}

/// Command surface of the chat platform. Role commands address roles by name;
/// resolving names to platform ids is the adapter's job. Granting a role the
/// member already has (or revoking one they lack) must succeed.
pub trait Platform: Send + Sync {
    fn grant_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;

    fn revoke_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;

    fn rename_member<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        nickname: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;

    /// Names of the roles the member holds right now.
    fn member_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<String>, PlatformError>>;

    fn send_message<'a>(
        &'a self,
        target: MessageTarget,
        content: &'a str,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>>;

    fn add_reaction<'a>(
        &'a self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;

    /// Immediate reply to a command invocation.
    fn reply<'a>(
        &'a self,
        interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;

    /// Acknowledge now, answer later through `send_followup`.
    fn defer_reply<'a>(&'a self, interaction: &'a Interaction) -> BoxFuture<'a, Result<(), PlatformError>>;

    fn send_followup<'a>(
        &'a self,
        interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;
}
