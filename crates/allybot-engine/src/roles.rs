use std::sync::Arc;

use allybot_db::Database;
use allybot_types::models::{BindOutcome, RoleBinding, UnbindOutcome};
use allybot_types::{ChannelId, CommunityId, MessageId, UserId};

use crate::error::EngineError;
use crate::run_blocking;

/// Emoji-to-role bindings, the selector message, and the ledger of role
/// intents the reconciler has already applied.
#[derive(Clone)]
pub struct RoleStore {
    db: Arc<Database>,
}

impl RoleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upserts a binding. Binding the same pair twice leaves the same state.
    pub async fn bind(
        &self,
        community_id: CommunityId,
        emoji: &str,
        role_name: &str,
    ) -> Result<BindOutcome, EngineError> {
        let emoji = emoji.trim().to_string();
        let role_name = role_name.trim().to_string();
        if emoji.is_empty() {
            return Err(EngineError::Validation("emoji must not be empty".into()));
        }
        if role_name.is_empty() {
            return Err(EngineError::Validation("role name must not be empty".into()));
        }

        run_blocking(&self.db, move |db| db.upsert_role_binding(community_id, &emoji, &role_name)).await
    }

    pub async fn unbind(&self, community_id: CommunityId, emoji: &str) -> Result<UnbindOutcome, EngineError> {
        let emoji = emoji.trim().to_string();
        run_blocking(&self.db, move |db| db.delete_role_binding(community_id, &emoji)).await
    }

    pub async fn lookup_role(&self, community_id: CommunityId, emoji: &str) -> Result<Option<String>, EngineError> {
        let emoji = emoji.to_string();
        run_blocking(&self.db, move |db| db.get_role_binding(community_id, &emoji)).await
    }

    pub async fn list(&self, community_id: CommunityId) -> Result<Vec<RoleBinding>, EngineError> {
        run_blocking(&self.db, move |db| db.list_role_bindings(community_id)).await
    }

    /// Replaces the community's selector message; the previous one stops counting.
    pub async fn set_selector_message(
        &self,
        community_id: CommunityId,
        channel_id: Option<ChannelId>,
        message_id: MessageId,
    ) -> Result<(), EngineError> {
        run_blocking(&self.db, move |db| {
            db.set_selector_message(community_id, channel_id, message_id)
        })
        .await
    }

    pub async fn get_selector_message(&self, community_id: CommunityId) -> Result<Option<MessageId>, EngineError> {
        let selector = run_blocking(&self.db, move |db| db.get_selector_message(community_id)).await?;
        Ok(selector.map(|s| s.message_id))
    }

    pub async fn last_intent(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &str,
    ) -> Result<Option<bool>, EngineError> {
        let role_name = role_name.to_string();
        run_blocking(&self.db, move |db| db.get_reaction_grant(community_id, user_id, &role_name)).await
    }

    pub async fn record_intent(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &str,
        granted: bool,
    ) -> Result<(), EngineError> {
        let role_name = role_name.to_string();
        run_blocking(&self.db, move |db| {
            db.set_reaction_grant(community_id, user_id, &role_name, granted)
        })
        .await
    }
}
