use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::{info, warn};

use allybot_engine::EngineSettings;
use allybot_engine::platform::MessageTarget;
use allybot_engine::roles::RoleStore;
use allybot_types::alliance::{Alliance, AllianceSet};
use allybot_types::events::snowflake;
use allybot_types::{ChannelId, CommunityId, MessageId};

const DEFAULT_TOKEN_FILE: &str = "token-dev.txt";
const DEFAULT_ADMIN_ROLE: &str = "ADMIN";

/// Contents of the JSON config file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub bot_params: BotParams,
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
    #[serde(default)]
    pub admin_contact: Option<AdminContact>,
    #[serde(default, with = "snowflake::option")]
    pub log_channel: Option<ChannelId>,
    #[serde(default)]
    pub alliances: Vec<Alliance>,
    /// Reaction-role setup from before bindings lived in the database.
    #[serde(default)]
    pub servers: Vec<LegacyServer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotParams {
    pub env: String,
    #[serde(default, with = "snowflake::option")]
    pub application_id: Option<u64>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminContact {
    Channel(#[serde(with = "snowflake")] ChannelId),
    User(#[serde(with = "snowflake")] u64),
}

impl From<AdminContact> for MessageTarget {
    fn from(contact: AdminContact) -> Self {
        match contact {
            AdminContact::Channel(id) => MessageTarget::Channel(id),
            AdminContact::User(id) => MessageTarget::User(id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LegacyServer {
    #[serde(rename = "guildID", with = "snowflake")]
    pub guild_id: CommunityId,
    #[serde(rename = "messageID", with = "snowflake")]
    pub message_id: MessageId,
    #[serde(default)]
    pub roles: Vec<LegacyRole>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyRole {
    #[serde(rename = "roleEmote")]
    pub role_emote: String,
    #[serde(rename = "roleName")]
    pub role_name: String,
}

fn default_admin_role() -> String {
    DEFAULT_ADMIN_ROLE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

impl Environment {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => bail!("invalid environment `{}`; botParams.env must be local, dev or prod", other),
        }
    }
}

/// Secrets resolved once at startup.
#[derive(Clone)]
pub struct Secrets {
    pub bot_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").field("bot_token", &"<redacted>").finish()
    }
}

impl BotConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Environment::parse(&config.bot_params.env)?;
        if config.alliances.is_empty() {
            warn!("No alliances configured; applications will be refused");
        }
        Ok(config)
    }

    pub fn environment(&self) -> anyhow::Result<Environment> {
        Environment::parse(&self.bot_params.env)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            alliances: AllianceSet::new(self.alliances.clone()),
            admin_role: self.admin_role.clone(),
            admin_contact: self.admin_contact.map(MessageTarget::from),
            log_channel: self.log_channel,
        }
    }

    /// Reads the bot token for the configured environment. `lookup` reads
    /// environment variables; it is a parameter so tests need not touch the
    /// process environment.
    pub fn resolve_secrets(&self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Secrets> {
        let token = match self.environment()? {
            Environment::Local => {
                let path = self
                    .bot_params
                    .token_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading bot token from {}", path.display()))?
            }
            Environment::Dev => lookup("ALLYBOT_TOKEN_DEV").context("ALLYBOT_TOKEN_DEV is not set")?,
            Environment::Prod => lookup("ALLYBOT_TOKEN_PROD").context("ALLYBOT_TOKEN_PROD is not set")?,
        };

        let bot_token = token.trim().to_string();
        if bot_token.is_empty() {
            bail!("bot token for `{}` is empty", self.bot_params.env);
        }
        Ok(Secrets { bot_token })
    }
}

/// Seeds bindings and the selector message from the legacy `servers` list.
/// Communities that already have a selector are left alone, so changes made
/// through commands survive restarts.
pub async fn import_legacy_servers(roles: &RoleStore, servers: &[LegacyServer]) -> anyhow::Result<usize> {
    let mut imported = 0;
    for server in servers {
        if roles.get_selector_message(server.guild_id).await?.is_some() {
            continue;
        }
        for role in &server.roles {
            roles.bind(server.guild_id, &role.role_emote, &role.role_name).await?;
        }
        roles
            .set_selector_message(server.guild_id, None, server.message_id)
            .await?;
        info!(
            "Imported {} legacy binding(s) for community {}",
            server.roles.len(),
            server.guild_id
        );
        imported += 1;
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use allybot_db::Database;

    use super::*;

    const SAMPLE: &str = r#"{
        "botParams": { "env": "dev", "applicationId": "123" },
        "adminContact": { "channel": "99" },
        "logChannel": "98",
        "alliances": [ { "name": "nona", "reviewChannel": "10" } ],
        "servers": [
            {
                "guildID": "1",
                "messageID": "500",
                "roles": [
                    { "roleEmote": "✅", "roleName": "Member" },
                    { "roleEmote": "🐺", "roleName": "Wolf" }
                ]
            }
        ]
    }"#;

    fn sample() -> BotConfig {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_config_with_defaults() {
        let config = sample();
        assert_eq!(config.bot_params.application_id, Some(123));
        assert_eq!(config.admin_role, "ADMIN");

        let settings = config.engine_settings();
        assert_eq!(settings.admin_contact, Some(MessageTarget::Channel(99)));
        assert_eq!(settings.log_channel, Some(98));
        assert_eq!(settings.alliances.resolve("NONA").map(|a| a.review_channel), Some(10));
    }

    #[test]
    fn secrets_come_from_the_environment_for_dev_and_prod() {
        let config = sample();
        let secrets = config
            .resolve_secrets(|name| (name == "ALLYBOT_TOKEN_DEV").then(|| " abc \n".to_string()))
            .unwrap();
        assert_eq!(secrets.bot_token, "abc");
        assert!(!format!("{:?}", secrets).contains("abc"));

        assert!(config.resolve_secrets(|_| None).is_err());
        assert!(config.resolve_secrets(|_| Some("  ".into())).is_err());
    }

    #[test]
    fn local_reads_the_token_file() {
        let path = std::env::temp_dir().join(format!("allybot-token-{}.txt", std::process::id()));
        std::fs::write(&path, "local-token\n").unwrap();

        let mut config = sample();
        config.bot_params.env = "local".into();
        config.bot_params.token_file = Some(path.clone());
        let secrets = config.resolve_secrets(|_| None).unwrap();
        assert_eq!(secrets.bot_token, "local-token");

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn unknown_environment_is_fatal() {
        let mut config = sample();
        config.bot_params.env = "staging".into();
        assert!(config.resolve_secrets(|_| Some("t".into())).is_err());
    }

    #[tokio::test]
    async fn legacy_servers_seed_only_empty_communities() {
        let roles = RoleStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let config = sample();

        assert_eq!(import_legacy_servers(&roles, &config.servers).await.unwrap(), 1);
        assert_eq!(roles.get_selector_message(1).await.unwrap(), Some(500));
        assert_eq!(roles.lookup_role(1, "🐺").await.unwrap().as_deref(), Some("Wolf"));

        // A selector posted later wins over the config file
        roles.set_selector_message(1, Some(5), 777).await.unwrap();
        assert_eq!(import_legacy_servers(&roles, &config.servers).await.unwrap(), 0);
        assert_eq!(roles.get_selector_message(1).await.unwrap(), Some(777));
    }
}
