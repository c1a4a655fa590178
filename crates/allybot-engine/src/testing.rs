//! Recording platform double for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::Notify;

use allybot_types::events::Interaction;
use allybot_types::{ChannelId, CommunityId, MessageId, UserId};

use crate::platform::{MessageTarget, Platform, PlatformError};
use crate::translate::{Translation, Translator};

/// Every command the engine sent, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GrantRole { community_id: CommunityId, user_id: UserId, role: String },
    RevokeRole { community_id: CommunityId, user_id: UserId, role: String },
    Rename { community_id: CommunityId, user_id: UserId, nickname: String },
    Send { target: MessageTarget, content: String },
    AddReaction { channel_id: ChannelId, message_id: MessageId, emoji: String },
    Reply { content: String },
    Defer,
    Followup { content: String },
}

#[derive(Default)]
struct Failures {
    roles: HashMap<String, PlatformError>,
    grants_for: HashMap<UserId, PlatformError>,
    rename: Option<PlatformError>,
    messages_to: HashMap<MessageTarget, PlatformError>,
    member_lookup: Option<PlatformError>,
}

#[derive(Default)]
pub struct MockPlatform {
    calls: Mutex<Vec<Call>>,
    member_roles: Mutex<HashMap<(CommunityId, UserId), Vec<String>>>,
    failures: Mutex<Failures>,
    revoke_gate: Mutex<Option<Arc<Notify>>>,
    next_message_id: AtomicU64,
}

impl MockPlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn role_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::GrantRole { .. } | Call::RevokeRole { .. }))
            .collect()
    }

    pub fn sent_to(&self, target: MessageTarget) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { target: t, content } if t == target => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn set_member_roles(&self, community_id: CommunityId, user_id: UserId, roles: &[&str]) {
        self.member_roles
            .lock()
            .unwrap()
            .insert((community_id, user_id), roles.iter().map(|r| r.to_string()).collect());
    }

    /// Grant and revoke of this role name fail.
    pub fn fail_role(&self, role: &str, err: PlatformError) {
        self.failures.lock().unwrap().roles.insert(role.to_string(), err);
    }

    /// Any grant to this member fails.
    pub fn fail_grants_for(&self, user_id: UserId, err: PlatformError) {
        self.failures.lock().unwrap().grants_for.insert(user_id, err);
    }

    pub fn fail_renames(&self, err: PlatformError) {
        self.failures.lock().unwrap().rename = Some(err);
    }

    pub fn fail_messages_to(&self, target: MessageTarget, err: PlatformError) {
        self.failures.lock().unwrap().messages_to.insert(target, err);
    }

    /// The next revoke is recorded, then does not return until the returned
    /// handle is notified.
    pub fn hold_next_revoke(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.revoke_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_member_lookup(&self, err: PlatformError) {
        self.failures.lock().unwrap().member_lookup = Some(err);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn role_failure(&self, role: &str, grant_to: Option<UserId>) -> Option<PlatformError> {
        let failures = self.failures.lock().unwrap();
        if let Some(err) = failures.roles.get(role) {
            return Some(err.clone());
        }
        grant_to.and_then(|user| failures.grants_for.get(&user).cloned())
    }
}

impl Platform for MockPlatform {
    fn grant_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            if let Some(err) = self.role_failure(role_name, Some(user_id)) {
                return Err(err);
            }
            self.record(Call::GrantRole { community_id, user_id, role: role_name.to_string() });
            Ok(())
        })
    }

    fn revoke_role<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            if let Some(err) = self.role_failure(role_name, None) {
                return Err(err);
            }
            self.record(Call::RevokeRole { community_id, user_id, role: role_name.to_string() });
            let gate = self.revoke_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(())
        })
    }

    fn rename_member<'a>(
        &'a self,
        community_id: CommunityId,
        user_id: UserId,
        nickname: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            if let Some(err) = self.failures.lock().unwrap().rename.clone() {
                return Err(err);
            }
            self.record(Call::Rename { community_id, user_id, nickname: nickname.to_string() });
            Ok(())
        })
    }

    fn member_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<String>, PlatformError>> {
        Box::pin(async move {
            if let Some(err) = self.failures.lock().unwrap().member_lookup.clone() {
                return Err(err);
            }
            Ok(self
                .member_roles
                .lock()
                .unwrap()
                .get(&(community_id, user_id))
                .cloned()
                .unwrap_or_default())
        })
    }

    fn send_message<'a>(
        &'a self,
        target: MessageTarget,
        content: &'a str,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>> {
        Box::pin(async move {
            if let Some(err) = self.failures.lock().unwrap().messages_to.get(&target).cloned() {
                return Err(err);
            }
            self.record(Call::Send { target, content: content.to_string() });
            Ok(self.next_message_id.fetch_add(1, Ordering::Relaxed) + 9000)
        })
    }

    fn add_reaction<'a>(
        &'a self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            self.record(Call::AddReaction { channel_id, message_id, emoji: emoji.to_string() });
            Ok(())
        })
    }

    fn reply<'a>(
        &'a self,
        _interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            self.record(Call::Reply { content: content.to_string() });
            Ok(())
        })
    }

    fn defer_reply<'a>(&'a self, _interaction: &'a Interaction) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            self.record(Call::Defer);
            Ok(())
        })
    }

    fn send_followup<'a>(
        &'a self,
        _interaction: &'a Interaction,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            self.record(Call::Followup { content: content.to_string() });
            Ok(())
        })
    }
}

/// Translator that upper-cases its input and claims it was Spanish.
pub struct MockTranslator;

impl Translator for MockTranslator {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        _target_lang: &'a str,
    ) -> BoxFuture<'a, Result<Translation, PlatformError>> {
        Box::pin(async move {
            Ok(Translation {
                detected_source_lang: "es".to_string(),
                translated_text: text.to_uppercase(),
            })
        })
    }
}

/// Invocation handle for tests.
pub fn interaction() -> Interaction {
    Interaction {
        id: "1".to_string(),
        token: "token".to_string(),
        application_id: 1,
    }
}
