use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use allybot_types::alliance::AllianceSet;
use allybot_types::commands::Command;
use allybot_types::events::{Interaction, RawInvocation};
use allybot_types::models::{BindOutcome, UnbindOutcome};
use allybot_types::{ChannelId, CommunityId, UserId};

use crate::audit::{AuditLog, Severity};
use crate::error::EngineError;
use crate::gate::AuthorizationGate;
use crate::platform::{MessageTarget, Platform};
use crate::roles::RoleStore;
use crate::translate::Translator;
use crate::workflow::ApprovalWorkflow;

/// Validates invocations, runs the matching handler and turns every result
/// into exactly one reply. This is the only place handler errors are
/// classified and the only place that alerts the administrator for them.
pub struct CommandRouter {
    workflow: ApprovalWorkflow,
    roles: RoleStore,
    gate: AuthorizationGate,
    platform: Arc<dyn Platform>,
    translator: Option<Arc<dyn Translator>>,
    alliances: AllianceSet,
    audit: AuditLog,
}

struct Invoker {
    community_id: Option<CommunityId>,
    user_id: UserId,
}

impl Invoker {
    fn community(&self) -> Result<CommunityId, EngineError> {
        self.community_id
            .ok_or_else(|| EngineError::Validation("this command only works inside a server".into()))
    }
}

impl CommandRouter {
    pub fn new(
        workflow: ApprovalWorkflow,
        roles: RoleStore,
        gate: AuthorizationGate,
        platform: Arc<dyn Platform>,
        translator: Option<Arc<dyn Translator>>,
        alliances: AllianceSet,
        audit: AuditLog,
    ) -> Self {
        Self {
            workflow,
            roles,
            gate,
            platform,
            translator,
            alliances,
            audit,
        }
    }

    /// Handles one invocation end to end. Returns the text sent back.
    pub async fn handle(&self, raw: RawInvocation) -> String {
        let interaction = raw.interaction;
        let invoker = Invoker {
            community_id: raw.community_id,
            user_id: raw.user_id,
        };

        let command = match Command::parse(&raw.name, &raw.options, &self.alliances) {
            Ok(command) => command,
            Err(e) => {
                debug!("Rejected invocation of `{}`: {}", raw.name, e);
                let content = EngineError::from(e).user_message();
                self.respond(&interaction, false, &content).await;
                return content;
            }
        };

        // Long paths acknowledge first so the platform does not time out and redeliver.
        let mut deferred = false;
        if command.is_long_running() {
            match self.platform.defer_reply(&interaction).await {
                Ok(()) => deferred = true,
                Err(e) => warn!("Failed to defer `{}`: {}", command.name(), e),
            }
        }

        let content = match self.execute(&invoker, &command).await {
            Ok(content) => content,
            Err(err) => self.report_failure(command.name(), &invoker, err).await,
        };

        self.respond(&interaction, deferred, &content).await;
        content
    }

    async fn execute(&self, invoker: &Invoker, command: &Command) -> Result<String, EngineError> {
        if command.requires_community() {
            invoker.community()?;
        }
        let actor = invoker.user_id;

        match command {
            Command::Apply { username, alliance } => {
                let community_id = invoker.community()?;
                self.workflow
                    .handle_submission(community_id, actor, username, alliance)
                    .await
                    .map(|o| o.message())
            }
            Command::Pending { alliance } => self
                .workflow
                .list_pending(actor, invoker.community()?, alliance)
                .await
                .map(|o| o.message()),
            Command::Approve { username, alliance } => self
                .workflow
                .handle_approve(actor, invoker.community()?, username, alliance)
                .await
                .map(|o| o.message()),
            Command::ApproveAll { alliance } => self
                .workflow
                .handle_approve_all(actor, invoker.community()?, alliance)
                .await
                .map(|o| o.message()),
            Command::Reject { username, alliance } => self
                .workflow
                .handle_reject(actor, invoker.community()?, username, alliance)
                .await
                .map(|o| o.message()),
            Command::BindRole { emoji, role } => self.bind_role(actor, invoker.community()?, emoji, role).await,
            Command::UnbindRole { emoji } => self.unbind_role(actor, invoker.community()?, emoji).await,
            Command::ListRoles => self.list_roles(invoker.community()?).await,
            Command::Selector { channel_id } => {
                self.post_selector(actor, invoker.community()?, *channel_id).await
            }
            Command::Translate { text, target_lang } => self.translate(text, target_lang).await,
        }
    }

    async fn bind_role(
        &self,
        actor: UserId,
        community_id: CommunityId,
        emoji: &str,
        role: &str,
    ) -> Result<String, EngineError> {
        self.gate.require_admin(actor, community_id).await?;
        let outcome = self.roles.bind(community_id, emoji, role).await?;
        self.audit.write_log(
            "role_bound",
            json!({ "community_id": community_id.to_string(), "emoji": emoji, "role": role }),
            Severity::Info,
        );
        Ok(match outcome {
            BindOutcome::Created => format!("Reacting with {} now grants `{}`.", emoji, role),
            BindOutcome::Replaced => {
                format!("Reacting with {} now grants `{}` (previous mapping replaced).", emoji, role)
            }
        })
    }

    async fn unbind_role(&self, actor: UserId, community_id: CommunityId, emoji: &str) -> Result<String, EngineError> {
        self.gate.require_admin(actor, community_id).await?;
        match self.roles.unbind(community_id, emoji).await? {
            UnbindOutcome::Removed => {
                self.audit.write_log(
                    "role_unbound",
                    json!({ "community_id": community_id.to_string(), "emoji": emoji }),
                    Severity::Info,
                );
                Ok(format!("{} no longer grants a role.", emoji))
            }
            UnbindOutcome::NotFound => Ok(format!("{} was not mapped to a role.", emoji)),
        }
    }

    async fn list_roles(&self, community_id: CommunityId) -> Result<String, EngineError> {
        let bindings = self.roles.list(community_id).await?;
        if bindings.is_empty() {
            return Ok("No emoji roles are configured.".to_string());
        }
        let mut out = String::from("Emoji roles:");
        for binding in bindings {
            let _ = write!(out, "\n{} → `{}`", binding.emoji, binding.role_name);
        }
        Ok(out)
    }

    /// Posts a new selector message, makes it the only one that counts, and
    /// seeds it with one reaction per binding.
    async fn post_selector(
        &self,
        actor: UserId,
        community_id: CommunityId,
        channel_id: ChannelId,
    ) -> Result<String, EngineError> {
        self.gate.require_admin(actor, community_id).await?;
        let bindings = self.roles.list(community_id).await?;
        if bindings.is_empty() {
            return Err(EngineError::Validation(
                "bind at least one emoji before posting a selector message".into(),
            ));
        }

        let mut content = String::from("React below to pick your roles:");
        for binding in &bindings {
            let _ = write!(content, "\n{} → {}", binding.emoji, binding.role_name);
        }
        let message_id = self
            .platform
            .send_message(MessageTarget::Channel(channel_id), &content)
            .await?;
        self.roles
            .set_selector_message(community_id, Some(channel_id), message_id)
            .await?;
        info!("Selector message for {} is now {}", community_id, message_id);

        for binding in &bindings {
            if let Err(e) = self.platform.add_reaction(channel_id, message_id, &binding.emoji).await {
                return Err(EngineError::PartialSuccess {
                    committed: format!("selector message {} posted", message_id),
                    effect: format!("seeding the {} reaction", binding.emoji),
                    source: e,
                });
            }
        }
        Ok(format!("Selector message posted in <#{}>.", channel_id))
    }

    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, EngineError> {
        let Some(translator) = &self.translator else {
            return Err(EngineError::External("no translation service configured".into()));
        };
        let translation = translator.translate(text, target_lang).await?;
        Ok(format!(
            "({} → {}) {}",
            translation.detected_source_lang, target_lang, translation.translated_text
        ))
    }

    /// Central error policy: caller errors are explained, infrastructure
    /// errors are logged, audited and sent to the administrator.
    async fn report_failure(&self, command: &str, invoker: &Invoker, err: EngineError) -> String {
        if !err.needs_admin() {
            debug!("`{}` by {} refused: {}", command, invoker.user_id, err);
            return err.user_message();
        }

        error!("`{}` by {} failed: {}", command, invoker.user_id, err);
        let kind = match &err {
            EngineError::PartialSuccess { .. } => "partial_success",
            _ => "external_failure",
        };
        self.audit.write_log(
            kind,
            json!({
                "command": command,
                "community_id": invoker.community_id.map(|c| c.to_string()),
                "user_id": invoker.user_id.to_string(),
                "detail": err.to_string(),
            }),
            Severity::Error,
        );
        self.audit.notify_admin(command, &err.to_string()).await;
        err.user_message()
    }

    async fn respond(&self, interaction: &Interaction, deferred: bool, content: &str) {
        let result = if deferred {
            self.platform.send_followup(interaction, content).await
        } else {
            self.platform.reply(interaction, content).await
        };
        if let Err(e) = result {
            error!("Failed to answer interaction {}: {}", interaction.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use allybot_db::Database;
    use allybot_types::alliance::Alliance;
    use serde_json::{Value, json};

    use super::*;
    use crate::platform::PlatformError;
    use crate::testing::{Call, MockPlatform, MockTranslator, interaction};
    use crate::{Engine, EngineSettings};

    const C: CommunityId = 1;
    const ADMIN_CHANNEL: u64 = 99;

    fn engine(platform: Arc<MockPlatform>) -> Engine {
        platform.set_member_roles(C, 100, &["ADMIN"]);
        platform.set_member_roles(C, 200, &["LEADER-NONA"]);
        Engine::new(
            Arc::new(Database::open_in_memory().unwrap()),
            platform,
            Some(Arc::new(MockTranslator)),
            EngineSettings {
                alliances: AllianceSet::new(vec![Alliance {
                    name: "NONA".into(),
                    review_channel: 10,
                    role: None,
                }]),
                admin_role: "ADMIN".into(),
                admin_contact: Some(MessageTarget::Channel(ADMIN_CHANNEL)),
                log_channel: None,
            },
        )
    }

    fn invoke(user_id: UserId, name: &str, options: Value) -> RawInvocation {
        RawInvocation {
            interaction: interaction(),
            community_id: Some(C),
            user_id,
            name: name.to_string(),
            options: serde_json::from_value::<BTreeMap<String, Value>>(options).unwrap(),
        }
    }

    #[tokio::test]
    async fn invalid_options_are_answered_without_side_effects() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());

        let reply = engine
            .router
            .handle(invoke(7, "apply", json!({"username": "bob", "alliance": "WOLF"})))
            .await;
        assert!(reply.starts_with("Invalid input:"));
        assert_eq!(platform.calls(), vec![Call::Reply { content: reply }]);
    }

    #[tokio::test]
    async fn conflicts_get_specific_explanations() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());
        let apply = || invoke(7, "apply", json!({"username": "bob", "alliance": "NONA"}));

        engine.router.handle(apply()).await;
        let reply = engine.router.handle(apply()).await;
        assert!(reply.contains("already have a pending application"));
        assert!(platform.sent_to(MessageTarget::Channel(ADMIN_CHANNEL)).is_empty());
    }

    #[tokio::test]
    async fn approve_all_defers_and_follows_up() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());
        engine
            .router
            .handle(invoke(7, "apply", json!({"username": "bob", "alliance": "NONA"})))
            .await;

        let reply = engine
            .router
            .handle(invoke(200, "approve-all", json!({"alliance": "NONA"})))
            .await;
        assert!(reply.starts_with("Approved 1 application(s) for NONA."));

        let calls = platform.calls();
        let defer_at = calls.iter().position(|c| *c == Call::Defer).unwrap();
        let grant_at = calls
            .iter()
            .position(|c| matches!(c, Call::GrantRole { .. }))
            .unwrap();
        assert!(defer_at < grant_at);
        assert_eq!(calls.last(), Some(&Call::Followup { content: reply }));
    }

    #[tokio::test]
    async fn partial_success_is_generic_for_caller_and_reaches_admin() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());
        engine
            .router
            .handle(invoke(7, "apply", json!({"username": "bob", "alliance": "NONA"})))
            .await;
        platform.fail_renames(PlatformError::Forbidden("cannot rename owner".into()));

        let reply = engine
            .router
            .handle(invoke(200, "approve", json!({"username": "bob", "alliance": "NONA"})))
            .await;
        assert_eq!(reply, "The command failed. An administrator has been notified.");

        let alerts = platform.sent_to(MessageTarget::Channel(ADMIN_CHANNEL));
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("/approve"));
        assert!(alerts[0].contains("rename"));
    }

    #[tokio::test]
    async fn binding_requires_admin_role() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());

        let reply = engine
            .router
            .handle(invoke(7, "bind-role", json!({"emoji": "✅", "role": "Member"})))
            .await;
        assert_eq!(reply, "You need the `ADMIN` role to do that.");

        let reply = engine
            .router
            .handle(invoke(100, "bind-role", json!({"emoji": "✅", "role": "Member"})))
            .await;
        assert_eq!(reply, "Reacting with ✅ now grants `Member`.");

        let reply = engine.router.handle(invoke(7, "roles", json!({}))).await;
        assert_eq!(reply, "Emoji roles:\n✅ → `Member`");
    }

    #[tokio::test]
    async fn selector_command_enables_reaction_roles() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());
        engine
            .router
            .handle(invoke(100, "bind-role", json!({"emoji": "✅", "role": "Member"})))
            .await;
        engine
            .router
            .handle(invoke(100, "selector", json!({"channel": "55"})))
            .await;

        let (message_id, seeded) = platform
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::AddReaction { message_id, emoji, .. } => Some((message_id, emoji)),
                _ => None,
            })
            .unwrap();
        assert_eq!(seeded, "✅");

        let event = allybot_types::events::ReactionEvent {
            community_id: C,
            message_id,
            user_id: 7,
            emoji: "✅".into(),
        };
        engine.reconciler.reaction_added(&event).await.unwrap();
        assert!(platform
            .role_calls()
            .contains(&Call::GrantRole { community_id: C, user_id: 7, role: "Member".into() }));
    }

    #[tokio::test]
    async fn community_commands_are_refused_in_direct_messages() {
        let platform = Arc::new(MockPlatform::default());
        let engine = engine(platform.clone());
        let mut raw = invoke(7, "roles", json!({}));
        raw.community_id = None;
        let reply = engine.router.handle(raw).await;
        assert!(reply.contains("only works inside a server"));

        let mut raw = invoke(7, "translate", json!({"text": "hola", "target": "en"}));
        raw.community_id = None;
        assert_eq!(engine.router.handle(raw).await, "(es → en) HOLA");
    }
}
