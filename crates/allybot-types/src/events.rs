use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ChannelId, CommunityId, MessageId, UserId};

/// Events delivered by the platform bridge. Delivery is at-least-once and
/// unordered across events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PlatformEvent {
    /// A user reacted to a message
    ReactionAdd(RawReaction),

    /// A user removed a reaction from a message
    ReactionRemove(RawReaction),

    /// A user invoked one of the bot's commands
    CommandInvoked(RawInvocation),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReaction {
    /// Absent for reactions in direct messages.
    #[serde(default, with = "snowflake::option")]
    pub community_id: Option<CommunityId>,
    #[serde(default, with = "snowflake::option")]
    pub channel_id: Option<ChannelId>,
    #[serde(with = "snowflake")]
    pub message_id: MessageId,
    #[serde(with = "snowflake")]
    pub user_id: UserId,
    pub emoji: String,
}

/// A reaction that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub community_id: CommunityId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

impl RawReaction {
    /// Drops direct-message reactions and blank emoji.
    pub fn validate(self) -> Option<ReactionEvent> {
        let community_id = self.community_id?;
        let emoji = self.emoji.trim();
        if emoji.is_empty() {
            return None;
        }
        Some(ReactionEvent {
            community_id,
            message_id: self.message_id,
            user_id: self.user_id,
            emoji: emoji.to_string(),
        })
    }
}

/// Handle for replying to a command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    #[serde(with = "snowflake")]
    pub application_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInvocation {
    pub interaction: Interaction,
    #[serde(default, with = "snowflake::option")]
    pub community_id: Option<CommunityId>,
    #[serde(with = "snowflake")]
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Snowflakes arrive as JSON strings from the platform but as numbers from
/// some bridges; accept both and always emit strings.
pub mod snowflake {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(u64),
        Str(String),
    }

    fn from_repr<E: Error>(repr: Repr) -> Result<u64, E> {
        match repr {
            Repr::Num(n) => Ok(n),
            Repr::Str(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid snowflake: {}", s))),
        }
    }

    pub fn serialize<S: Serializer>(id: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        from_repr(Repr::deserialize(d)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(id: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => s.serialize_some(&id.to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
            Option::<Repr>::deserialize(d)?.map(from_repr).transpose()
        }
    }
}
