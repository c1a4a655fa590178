use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::ChannelId;
use crate::alliance::AllianceSet;
use crate::models::{MAX_USERNAME_LEN, normalize_username};

/// Commands the bot exposes, with their options already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit an application to join an alliance
    Apply { username: String, alliance: String },

    /// List pending applications for an alliance
    Pending { alliance: String },

    /// Approve one pending application
    Approve { username: String, alliance: String },

    /// Approve every pending application for an alliance
    ApproveAll { alliance: String },

    /// Reject one pending application
    Reject { username: String, alliance: String },

    /// Map an emoji on the selector message to a role
    BindRole { emoji: String, role: String },

    /// Remove an emoji mapping
    UnbindRole { emoji: String },

    /// List the emoji mappings of this community
    ListRoles,

    /// Post a fresh selector message in a channel
    Selector { channel_id: ChannelId },

    /// Translate a piece of text
    Translate { text: String, target_lang: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("missing option `{0}`")]
    MissingOption(&'static str),

    #[error("option `{name}` is invalid: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("`{value}` is not a known alliance (expected one of: {allowed})")]
    UnknownAlliance { value: String, allowed: String },
}

impl Command {
    /// Validates a raw invocation against the command table and the alliance enumeration.
    pub fn parse(
        name: &str,
        options: &BTreeMap<String, Value>,
        alliances: &AllianceSet,
    ) -> Result<Self, CommandError> {
        let opts = Options { options, alliances };
        let command = match name {
            "apply" => Self::Apply {
                username: opts.username()?,
                alliance: opts.alliance()?,
            },
            "pending" => Self::Pending { alliance: opts.alliance()? },
            "approve" => Self::Approve {
                username: opts.username()?,
                alliance: opts.alliance()?,
            },
            "approve-all" => Self::ApproveAll { alliance: opts.alliance()? },
            "reject" => Self::Reject {
                username: opts.username()?,
                alliance: opts.alliance()?,
            },
            "bind-role" => Self::BindRole {
                emoji: opts.string("emoji")?,
                role: opts.string("role")?,
            },
            "unbind-role" => Self::UnbindRole { emoji: opts.string("emoji")? },
            "roles" => Self::ListRoles,
            "selector" => Self::Selector { channel_id: opts.snowflake("channel")? },
            "translate" => Self::Translate {
                text: opts.string("text")?,
                target_lang: opts
                    .optional_string("target")
                    .unwrap_or_else(|| "en".to_string()),
            },
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Apply { .. } => "apply",
            Self::Pending { .. } => "pending",
            Self::Approve { .. } => "approve",
            Self::ApproveAll { .. } => "approve-all",
            Self::Reject { .. } => "reject",
            Self::BindRole { .. } => "bind-role",
            Self::UnbindRole { .. } => "unbind-role",
            Self::ListRoles => "roles",
            Self::Selector { .. } => "selector",
            Self::Translate { .. } => "translate",
        }
    }

    /// Commands that may outlive the platform's reply deadline and must defer.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Self::ApproveAll { .. })
    }

    /// Commands that only make sense inside a community.
    pub fn requires_community(&self) -> bool {
        !matches!(self, Self::Translate { .. })
    }
}

struct Options<'a> {
    options: &'a BTreeMap<String, Value>,
    alliances: &'a AllianceSet,
}

impl Options<'_> {
    fn optional_string(&self, name: &str) -> Option<String> {
        match self.options.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    fn string(&self, name: &'static str) -> Result<String, CommandError> {
        match self.options.get(name) {
            None | Some(Value::Null) => Err(CommandError::MissingOption(name)),
            Some(Value::String(s)) if s.trim().is_empty() => Err(CommandError::InvalidOption {
                name,
                reason: "must not be empty".into(),
            }),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(other) => Err(CommandError::InvalidOption {
                name,
                reason: format!("expected text, got {}", other),
            }),
        }
    }

    fn username(&self) -> Result<String, CommandError> {
        let username = normalize_username(&self.string("username")?);
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(CommandError::InvalidOption {
                name: "username",
                reason: format!("must be at most {} characters", MAX_USERNAME_LEN),
            });
        }
        Ok(username)
    }

    fn alliance(&self) -> Result<String, CommandError> {
        let value = self.string("alliance")?;
        self.alliances
            .resolve(&value)
            .map(|a| a.name.clone())
            .ok_or_else(|| CommandError::UnknownAlliance {
                value,
                allowed: self.alliances.names().collect::<Vec<_>>().join(", "),
            })
    }

    fn snowflake(&self, name: &'static str) -> Result<u64, CommandError> {
        let invalid = |reason: String| CommandError::InvalidOption { name, reason };
        match self.options.get(name) {
            None | Some(Value::Null) => Err(CommandError::MissingOption(name)),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(format!("{} is not an id", n))),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(format!("{} is not an id", s))),
            Some(other) => Err(invalid(format!("expected an id, got {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::alliance::Alliance;

    fn alliances() -> AllianceSet {
        AllianceSet::new(vec![Alliance { name: "NONA".into(), review_channel: 1, role: None }])
    }

    fn options(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn apply_normalizes_username_and_alliance() {
        let cmd = Command::parse(
            "apply",
            &options(json!({"username": " Bob ", "alliance": "nona"})),
            &alliances(),
        )
        .unwrap();
        assert_eq!(cmd, Command::Apply { username: "bob".into(), alliance: "NONA".into() });
    }

    #[test]
    fn unknown_alliance_lists_allowed_values() {
        let err = Command::parse("pending", &options(json!({"alliance": "WOLF"})), &alliances())
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::UnknownAlliance { value: "WOLF".into(), allowed: "NONA".into() }
        );
    }

    #[test]
    fn empty_role_is_rejected_at_the_boundary() {
        let err = Command::parse(
            "bind-role",
            &options(json!({"emoji": "✅", "role": "  "})),
            &alliances(),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidOption { name: "role", .. }));
    }

    #[test]
    fn missing_option_is_named() {
        let err = Command::parse("approve", &options(json!({"alliance": "NONA"})), &alliances())
            .unwrap_err();
        assert_eq!(err, CommandError::MissingOption("username"));
    }

    #[test]
    fn selector_channel_accepts_string_ids() {
        let cmd = Command::parse("selector", &options(json!({"channel": "123"})), &alliances())
            .unwrap();
        assert_eq!(cmd, Command::Selector { channel_id: 123 });
    }

    #[test]
    fn translate_defaults_to_english_and_skips_community_requirement() {
        let cmd = Command::parse("translate", &options(json!({"text": "hola"})), &alliances())
            .unwrap();
        assert_eq!(cmd, Command::Translate { text: "hola".into(), target_lang: "en".into() });
        assert!(!cmd.requires_community());
    }

    #[test]
    fn only_bulk_approval_defers() {
        assert!(Command::ApproveAll { alliance: "NONA".into() }.is_long_running());
        assert!(!Command::ListRoles.is_long_running());
        assert!(matches!(
            Command::parse("ban", &BTreeMap::new(), &alliances()),
            Err(CommandError::UnknownCommand(_))
        ));
    }
}
