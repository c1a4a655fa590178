//! Core of the bot: the role-mapping and applicant stores, the reaction
//! reconciler, the approval workflow, the authorization gate and the command
//! router that puts one error-handling policy in front of all of them.

pub mod applications;
pub mod audit;
pub mod commands;
pub mod error;
pub mod gate;
pub mod platform;
pub mod reconciler;
pub mod roles;
pub mod translate;
pub mod workflow;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::sync::Arc;

use allybot_db::Database;
use allybot_types::ChannelId;
use allybot_types::alliance::AllianceSet;

use crate::applications::ApplicationStore;
use crate::audit::AuditLog;
use crate::commands::CommandRouter;
use crate::error::EngineError;
use crate::gate::AuthorizationGate;
use crate::platform::{MessageTarget, Platform};
use crate::reconciler::ReactionReconciler;
use crate::roles::RoleStore;
use crate::translate::Translator;
use crate::workflow::ApprovalWorkflow;

/// Community-independent settings resolved at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub alliances: AllianceSet,
    /// Role allowed to manage emoji bindings and the selector message.
    pub admin_role: String,
    pub admin_contact: Option<MessageTarget>,
    pub log_channel: Option<ChannelId>,
}

/// Wires the components together around one store and one platform client.
pub struct Engine {
    pub reconciler: ReactionReconciler,
    pub router: CommandRouter,
}

impl Engine {
    pub fn new(
        db: Arc<Database>,
        platform: Arc<dyn Platform>,
        translator: Option<Arc<dyn Translator>>,
        settings: EngineSettings,
    ) -> Self {
        let audit = AuditLog::new(platform.clone(), settings.log_channel, settings.admin_contact);
        let roles = RoleStore::new(db.clone());
        let gate = AuthorizationGate::new(platform.clone(), settings.admin_role);
        let workflow = ApprovalWorkflow::new(
            ApplicationStore::new(db),
            gate.clone(),
            platform.clone(),
            settings.alliances.clone(),
            audit.clone(),
        );

        Self {
            reconciler: ReactionReconciler::new(roles.clone(), platform.clone(), audit.clone()),
            router: CommandRouter::new(
                workflow,
                roles,
                gate,
                platform,
                translator,
                settings.alliances,
                audit,
            ),
        }
    }
}

/// Runs a synchronous store call off the async executor.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, EngineError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| EngineError::External(format!("store task failed: {}", e)))?
        .map_err(EngineError::from)
}
