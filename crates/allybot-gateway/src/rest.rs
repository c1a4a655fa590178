use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use allybot_engine::platform::{MessageTarget, Platform, PlatformError};
use allybot_types::events::{Interaction, snowflake};
use allybot_types::{ChannelId, CommunityId, MessageId, UserId};

/// Longest message the platform accepts.
const MAX_CONTENT_CHARS: usize = 2000;
/// Longest rate-limit pause honoured before giving up on a call.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(5);

const CALLBACK_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED: u8 = 5;

#[derive(Debug, Deserialize)]
struct RoleObject {
    #[serde(with = "snowflake")]
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberObject {
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(with = "snowflake")]
    id: u64,
}

/// `Platform` over the Discord REST API. Roles are addressed by name in the
/// engine; this adapter keeps a per-community name → id table and refreshes
/// it whenever a name or id is not found.
pub struct DiscordRest {
    client: Client,
    api_base: Url,
    token: String,
    roles: RwLock<HashMap<CommunityId, HashMap<String, u64>>>,
}

impl DiscordRest {
    pub fn new(client: Client, api_base: &str, token: String) -> Result<Self, PlatformError> {
        let api_base = Url::parse(api_base)
            .map_err(|e| PlatformError::Unavailable(format!("invalid API base `{}`: {}", api_base, e)))?;
        Ok(Self {
            client,
            api_base,
            token,
            roles: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, PlatformError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::Unavailable(format!("API base `{}` cannot take a path", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Sends a request, waiting out one short rate limit, and maps non-2xx
    /// statuses onto `PlatformError`.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, PlatformError> {
        let retry = request.try_clone();
        let resp = request
            .send()
            .await
            .map_err(|e| PlatformError::Unavailable(format!("{}: {}", what, e)))?;

        let resp = match (resp.status(), retry) {
            (StatusCode::TOO_MANY_REQUESTS, Some(retry)) => match retry_after(&resp) {
                Some(wait) if wait <= MAX_RETRY_AFTER => {
                    debug!("Rate limited on {}, retrying in {:?}", what, wait);
                    tokio::time::sleep(wait).await;
                    retry
                        .send()
                        .await
                        .map_err(|e| PlatformError::Unavailable(format!("{}: {}", what, e)))?
                }
                _ => resp,
            },
            _ => resp,
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, what, &body))
    }

    async fn json<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder, what: &str) -> Result<T, PlatformError> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::Unavailable(format!("{}: malformed response: {}", what, e)))
    }

    async fn refresh_roles(&self, community_id: CommunityId) -> Result<HashMap<String, u64>, PlatformError> {
        let guild = community_id.to_string();
        let url = self.url(&["guilds", &guild, "roles"])?;
        let list: Vec<RoleObject> = self
            .json(self.authed(Method::GET, url), &format!("roles of {}", community_id))
            .await?;
        let table: HashMap<String, u64> = list.into_iter().map(|r| (r.name, r.id)).collect();
        self.roles.write().await.insert(community_id, table.clone());
        Ok(table)
    }

    async fn role_id(&self, community_id: CommunityId, role_name: &str) -> Result<u64, PlatformError> {
        let cached = self
            .roles
            .read()
            .await
            .get(&community_id)
            .and_then(|t| t.get(role_name).copied());
        if let Some(id) = cached {
            return Ok(id);
        }
        self.refresh_roles(community_id)
            .await?
            .get(role_name)
            .copied()
            .ok_or_else(|| PlatformError::NotFound(format!("role `{}`", role_name)))
    }

    async fn set_role(
        &self,
        method: Method,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        let role_id = self.role_id(community_id, role_name).await?.to_string();
        let (guild, user) = (community_id.to_string(), user_id.to_string());
        let url = self.url(&["guilds", &guild, "members", &user, "roles", &role_id])?;
        let what = format!("role `{}` for {}", role_name, user_id);
        match self.send(self.authed(method, url), &what).await {
            // The id may be stale after a role was recreated under the same name
            Err(PlatformError::NotFound(_)) => {
                self.roles.write().await.remove(&community_id);
                Err(PlatformError::NotFound(what))
            }
            other => other.map(|_| ()),
        }
    }

    async fn dm_channel(&self, user_id: UserId) -> Result<ChannelId, PlatformError> {
        let url = self.url(&["users", "@me", "channels"])?;
        let created: Created = self
            .json(
                self.authed(Method::POST, url)
                    .json(&json!({ "recipient_id": user_id.to_string() })),
                &format!("DM channel with {}", user_id),
            )
            .await?;
        Ok(created.id)
    }

    async fn interaction_post(&self, url: Url, body: Value, what: &str) -> Result<(), PlatformError> {
        // Interaction endpoints are authorized by the token in the path
        self.send(self.client.post(url).json(&body), what).await.map(|_| ())
    }
}

impl Platform for DiscordRest {
    fn grant_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(self.set_role(Method::PUT, community_id, user_id, role_name))
    }

    fn revoke_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(self.set_role(Method::DELETE, community_id, user_id, role_name))
    }

    fn rename_member<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        nickname: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            let (guild, user) = (community_id.to_string(), user_id.to_string());
            let url = self.url(&["guilds", &guild, "members", &user])?;
            let request = self.authed(Method::PATCH, url).json(&json!({ "nick": nickname }));
            self.send(request, &format!("nickname of {}", user_id)).await.map(|_| ())
        })
    }

    fn member_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<String>, PlatformError>> {
        Box::pin(async move {
            let (guild, user) = (community_id.to_string(), user_id.to_string());
            let url = self.url(&["guilds", &guild, "members", &user])?;
            let member: MemberObject = self
                .json(self.authed(Method::GET, url), &format!("member {}", user_id))
                .await?;

            // Permission checks must see current names, so always refresh
            let table = self.refresh_roles(community_id).await?;
            let by_id: HashMap<String, &String> = table.iter().map(|(name, id)| (id.to_string(), name)).collect();
            Ok(member
                .roles
                .iter()
                .filter_map(|id| by_id.get(id).map(|name| name.to_string()))
                .collect())
        })
    }

    fn send_message<'a>(
        &'a self,
        target: MessageTarget,
        content: &'a str,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>> {
        Box::pin(async move {
            let channel_id = match target {
                MessageTarget::Channel(id) => id,
                MessageTarget::User(user_id) => self.dm_channel(user_id).await?,
            };
            let channel = channel_id.to_string();
            let url = self.url(&["channels", &channel, "messages"])?;
            let request = self
                .authed(Method::POST, url)
                .json(&json!({ "content": clamp(content) }));
            let created: Created = self.json(request, &format!("message to {}", target)).await?;
            Ok(created.id)
        })
    }

    fn add_reaction<'a>(
        &'a self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            let (channel, message) = (channel_id.to_string(), message_id.to_string());
            let url = self.url(&["channels", &channel, "messages", &message, "reactions", emoji, "@me"])?;
            self.send(self.authed(Method::PUT, url), &format!("reaction {} on {}", emoji, message_id))
                .await
                .map(|_| ())
        })
    }

    fn reply<'a>(
        &'a self,
        interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            let url = self.url(&["interactions", &interaction.id, &interaction.token, "callback"])?;
            let body = json!({ "type": CALLBACK_MESSAGE, "data": { "content": clamp(content) } });
            self.interaction_post(url, body, "interaction reply").await
        })
    }

    fn defer_reply<'a>(&'a self, interaction: &'a Interaction) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            let url = self.url(&["interactions", &interaction.id, &interaction.token, "callback"])?;
            self.interaction_post(url, json!({ "type": CALLBACK_DEFERRED }), "interaction defer")
                .await
        })
    }

    fn send_followup<'a>(
        &'a self,
        interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            let application = interaction.application_id.to_string();
            let url = self.url(&["webhooks", &application, &interaction.token])?;
            self.interaction_post(url, json!({ "content": clamp(content) }), "interaction followup")
                .await
        })
    }
}

fn classify(status: StatusCode, what: &str, body: &str) -> PlatformError {
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(what.to_string()),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            PlatformError::Forbidden(format!("{}: {}", what, body))
        }
        _ => {
            if status.is_client_error() {
                warn!("Platform rejected {} with {}: {}", what, status, body);
            }
            PlatformError::Unavailable(format!("{}: {} {}", what, status, body))
        }
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    let secs: f64 = resp.headers().get("retry-after")?.to_str().ok()?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn clamp(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_CONTENT_CHARS - 1).collect();
    out.push('…');
    out
}
