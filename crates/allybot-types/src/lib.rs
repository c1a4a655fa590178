//! Shared types for the allybot workspace: domain models, the closed alliance
//! registry, inbound platform events and the typed commands parsed from them.

pub mod alliance;
pub mod commands;
pub mod events;
pub mod models;

/// Platform snowflake ids. All of them are opaque 64-bit integers.
pub type CommunityId = u64;
pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
