use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use allybot_types::events::ReactionEvent;
use allybot_types::{CommunityId, UserId};

use crate::audit::{AuditLog, Severity};
use crate::error::EngineError;
use crate::platform::{Platform, PlatformError};
use crate::roles::RoleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Grant,
    Revoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The community has no selector message yet
    NoSelector,
    /// The reaction is on some other message
    OtherMessage,
    /// No role is bound to this emoji
    UnboundEmoji,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Ignored(IgnoreReason),
    /// The role command was sent and acknowledged
    Applied { role: String },
    /// The same intent was already applied; nothing sent
    Duplicate { role: String },
    /// The bound role no longer exists on the platform
    StaleBinding { role: String },
}

/// Turns selector-message reactions into role grants and revocations.
///
/// Deliveries may repeat or arrive out of order. Each processed event is
/// compared with the last intent applied for (community, member, role): a
/// repeat of that intent sends nothing, anything else is sent and recorded.
/// The final role state therefore follows the last processed event.
///
/// Events for the same key run one at a time: the ledger check, the platform
/// call and the ledger write happen under one per-key lock, so concurrent
/// deliveries cannot leave the ledger disagreeing with the platform.
pub struct ReactionReconciler {
    roles: RoleStore,
    platform: Arc<dyn Platform>,
    audit: AuditLog,
    in_flight: Mutex<HashMap<GrantKey, Arc<AsyncMutex<()>>>>,
}

type GrantKey = (CommunityId, UserId, String);

impl ReactionReconciler {
    pub fn new(roles: RoleStore, platform: Arc<dyn Platform>, audit: AuditLog) -> Self {
        Self {
            roles,
            platform,
            audit,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn reaction_added(&self, event: &ReactionEvent) -> Result<ReconcileOutcome, EngineError> {
        self.reconcile(event, Intent::Grant).await
    }

    pub async fn reaction_removed(&self, event: &ReactionEvent) -> Result<ReconcileOutcome, EngineError> {
        self.reconcile(event, Intent::Revoke).await
    }

    async fn reconcile(&self, event: &ReactionEvent, intent: Intent) -> Result<ReconcileOutcome, EngineError> {
        let community_id = event.community_id;

        match self.roles.get_selector_message(community_id).await? {
            None => return Ok(ReconcileOutcome::Ignored(IgnoreReason::NoSelector)),
            Some(selector) if selector != event.message_id => {
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::OtherMessage));
            }
            Some(_) => {}
        }

        let Some(role) = self.roles.lookup_role(community_id, &event.emoji).await? else {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::UnboundEmoji));
        };

        let key = (community_id, event.user_id, role.clone());
        let lock = self.key_lock(&key)?;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply(event, intent, role).await
        };
        drop(lock);
        self.release_key(&key);
        outcome
    }

    fn key_lock(&self, key: &GrantKey) -> Result<Arc<AsyncMutex<()>>, EngineError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|e| EngineError::External(format!("reaction lock poisoned: {}", e)))?;
        Ok(in_flight.entry(key.clone()).or_default().clone())
    }

    /// Forgets the key once no other event holds or waits for it.
    fn release_key(&self, key: &GrantKey) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        if in_flight.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            in_flight.remove(key);
        }
    }

    /// Must run under the key lock.
    async fn apply(&self, event: &ReactionEvent, intent: Intent, role: String) -> Result<ReconcileOutcome, EngineError> {
        let community_id = event.community_id;
        let granted = intent == Intent::Grant;
        if self.roles.last_intent(community_id, event.user_id, &role).await? == Some(granted) {
            debug!(
                "Duplicate {:?} of `{}` for {} in {}, skipping",
                intent, role, event.user_id, community_id
            );
            return Ok(ReconcileOutcome::Duplicate { role });
        }

        let result = match intent {
            Intent::Grant => self.platform.grant_role(community_id, event.user_id, &role).await,
            Intent::Revoke => self.platform.revoke_role(community_id, event.user_id, &role).await,
        };

        let payload = json!({
            "community_id": community_id.to_string(),
            "user_id": event.user_id.to_string(),
            "emoji": event.emoji,
            "role": role,
        });

        match result {
            Ok(()) => {
                self.roles
                    .record_intent(community_id, event.user_id, &role, granted)
                    .await?;
                let action = if granted { "reaction_role_granted" } else { "reaction_role_revoked" };
                self.audit.write_log(action, payload, Severity::Info);
                Ok(ReconcileOutcome::Applied { role })
            }
            // Configuration problem, not a transient one: report and move on.
            Err(PlatformError::NotFound(what)) => {
                warn!(
                    "Binding {} -> `{}` in {} is stale ({} not found)",
                    event.emoji, role, community_id, what
                );
                self.audit.write_log("reaction_role_stale", payload, Severity::Warning);
                Ok(ReconcileOutcome::StaleBinding { role })
            }
            Err(e) => Err(e.into()),
        }
    }
}
