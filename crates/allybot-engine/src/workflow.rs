use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use allybot_types::alliance::{Alliance, AllianceSet};
use allybot_types::models::{ApplicationRecord, SubmitOutcome, member_display_name};
use allybot_types::{CommunityId, UserId};

use crate::applications::ApplicationStore;
use crate::audit::{AuditLog, Severity};
use crate::error::{Conflict, EngineError};
use crate::gate::AuthorizationGate;
use crate::platform::{MessageTarget, Platform, PlatformError};

/// Successful results of the workflow, rendered into a reply by `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Submitted(ApplicationRecord),
    Approved(ApplicationRecord),
    Rejected(ApplicationRecord),
    PendingList {
        alliance: String,
        records: Vec<ApplicationRecord>,
    },
    BulkApproved(BulkSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub alliance: String,
    /// Approved with every side effect applied
    pub approved: Vec<String>,
    /// Approved in the store, but (username, failed effects)
    pub partial: Vec<(String, String)>,
    /// Not approved: (username, reason)
    pub skipped: Vec<(String, String)>,
}

impl Outcome {
    pub fn message(&self) -> String {
        match self {
            Self::Submitted(record) => format!(
                "Your application to join {} as `{}` was received. A leader will review it.",
                record.alliance, record.username
            ),
            Self::Approved(record) => format!(
                "Approved `{}` into {}.",
                record.username, record.alliance
            ),
            Self::Rejected(record) => format!(
                "Rejected `{}`. They can no longer apply to any alliance in this server.",
                record.username
            ),
            Self::PendingList { alliance, records } if records.is_empty() => {
                format!("No pending applications for {}.", alliance)
            }
            Self::PendingList { alliance, records } => {
                let mut out = format!("Pending applications for {} ({}):", alliance, records.len());
                for record in records {
                    let _ = write!(
                        out,
                        "\n• `{}` by <@{}> since {}",
                        record.username,
                        record.applicant_id,
                        record.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
                out
            }
            Self::BulkApproved(summary) => summary.message(),
        }
    }
}

impl BulkSummary {
    fn message(&self) -> String {
        let total = self.approved.len() + self.partial.len();
        if total == 0 && self.skipped.is_empty() {
            return format!("No pending applications for {}.", self.alliance);
        }

        let mut out = format!("Approved {} application(s) for {}.", total, self.alliance);
        if !self.approved.is_empty() {
            let _ = write!(out, "\nDone: {}", self.approved.join(", "));
        }
        if !self.partial.is_empty() {
            let _ = write!(out, "\nApproved, but an administrator must finish:");
            for (username, effects) in &self.partial {
                let _ = write!(out, "\n• `{}`: {}", username, effects);
            }
        }
        if !self.skipped.is_empty() {
            let _ = write!(out, "\nNot approved:");
            for (username, reason) in &self.skipped {
                let _ = write!(out, "\n• `{}`: {}", username, reason);
            }
        }
        out
    }
}

/// Drives applications through `Pending → Approved | Rejected`.
///
/// Every leader operation is authorized first and makes no change when that
/// fails. The store transition is always committed before any platform call;
/// a platform failure afterwards is a partial success, never a rollback.
pub struct ApprovalWorkflow {
    applications: ApplicationStore,
    gate: AuthorizationGate,
    platform: Arc<dyn Platform>,
    alliances: AllianceSet,
    audit: AuditLog,
}

impl ApprovalWorkflow {
    pub fn new(
        applications: ApplicationStore,
        gate: AuthorizationGate,
        platform: Arc<dyn Platform>,
        alliances: AllianceSet,
        audit: AuditLog,
    ) -> Self {
        Self {
            applications,
            gate,
            platform,
            alliances,
            audit,
        }
    }

    pub async fn handle_submission(
        &self,
        community_id: CommunityId,
        applicant: UserId,
        username: &str,
        alliance: &str,
    ) -> Result<Outcome, EngineError> {
        let alliance = self.alliance(alliance)?;

        let record = match self
            .applications
            .submit(community_id, applicant, username, &alliance.name)
            .await?
        {
            SubmitOutcome::Created(record) => record,
            SubmitOutcome::AlreadyPending(existing) => {
                return Err(Conflict::AlreadyPending { alliance: existing.alliance }.into());
            }
            SubmitOutcome::RejectedBlocked => return Err(Conflict::RejectedBlocked.into()),
            SubmitOutcome::AlreadyApproved(existing) => {
                return Err(Conflict::AlreadyApproved { alliance: existing.alliance }.into());
            }
            SubmitOutcome::DuplicateUsername => {
                return Err(Conflict::DuplicateUsername { username: username.to_lowercase() }.into());
            }
        };

        info!(
            "Application {} created: {} as `{}` for {}",
            record.id, applicant, record.username, record.alliance
        );
        self.audit.write_log(
            "application_submitted",
            json!({
                "community_id": community_id.to_string(),
                "applicant_id": applicant.to_string(),
                "username": record.username,
                "alliance": record.alliance,
            }),
            Severity::Info,
        );

        let notice = format!(
            "New application for {}: <@{}> as `{}`.\nUse `/approve username:{} alliance:{}` or `/reject`.",
            record.alliance, applicant, record.username, record.username, record.alliance
        );
        if let Err(e) = self
            .platform
            .send_message(MessageTarget::Channel(alliance.review_channel), &notice)
            .await
        {
            return Err(EngineError::PartialSuccess {
                committed: format!("application of `{}` to {} recorded", record.username, record.alliance),
                effect: "review channel notification".to_string(),
                source: e,
            });
        }

        Ok(Outcome::Submitted(record))
    }

    pub async fn list_pending(
        &self,
        actor: UserId,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<Outcome, EngineError> {
        let alliance = self.alliance(alliance)?;
        self.gate.require_leader(actor, community_id, &alliance.name).await?;

        let records = self.applications.get_pending(community_id, &alliance.name).await?;
        Ok(Outcome::PendingList {
            alliance: alliance.name.clone(),
            records,
        })
    }

    pub async fn handle_approve(
        &self,
        actor: UserId,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<Outcome, EngineError> {
        let alliance = self.alliance(alliance)?;
        self.gate.require_leader(actor, community_id, &alliance.name).await?;
        self.ensure_current(community_id, username, &alliance.name).await?;

        let Some(record) = self
            .applications
            .approve(community_id, username, &alliance.name)
            .await?
        else {
            return Err(not_pending(username, &alliance.name));
        };
        self.log_decision("application_approved", actor, &record);

        let failures = self.apply_membership(&record, alliance).await;
        if let Some(err) = partial_success(&record, failures) {
            return Err(err);
        }
        Ok(Outcome::Approved(record))
    }

    pub async fn handle_reject(
        &self,
        actor: UserId,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<Outcome, EngineError> {
        let alliance = self.alliance(alliance)?;
        self.gate.require_leader(actor, community_id, &alliance.name).await?;
        self.ensure_current(community_id, username, &alliance.name).await?;

        let Some(record) = self
            .applications
            .reject(community_id, username, &alliance.name)
            .await?
        else {
            return Err(not_pending(username, &alliance.name));
        };
        self.log_decision("application_rejected", actor, &record);

        let notice = format!(
            "Your application to join {} as `{}` was rejected. \
             You are now blocked from applying to any alliance in this server.",
            record.alliance, record.username
        );
        if let Err(e) = self
            .platform
            .send_message(MessageTarget::User(record.applicant_id), &notice)
            .await
        {
            return Err(EngineError::PartialSuccess {
                committed: format!("`{}` rejected from {}", record.username, record.alliance),
                effect: "applicant notification".to_string(),
                source: e,
            });
        }
        Ok(Outcome::Rejected(record))
    }

    pub async fn handle_approve_all(
        &self,
        actor: UserId,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<Outcome, EngineError> {
        let alliance = self.alliance(alliance)?;
        self.gate.require_leader(actor, community_id, &alliance.name).await?;

        let batch = self.applications.approve_all(community_id, &alliance.name).await?;
        let mut summary = BulkSummary {
            alliance: alliance.name.clone(),
            ..Default::default()
        };

        for (record, reason) in batch.failed {
            warn!("Bulk approval skipped `{}`: {}", record.username, reason);
            summary.skipped.push((record.username, reason));
        }

        for record in batch.approved {
            self.log_decision("application_approved", actor, &record);
            let failures = self.apply_membership(&record, alliance).await;
            if failures.is_empty() {
                summary.approved.push(record.username);
            } else {
                summary.partial.push((record.username, describe(&failures)));
            }
        }

        if !summary.partial.is_empty() {
            let detail = summary
                .partial
                .iter()
                .map(|(username, effects)| format!("`{}` approved into {} but {}", username, summary.alliance, effects))
                .collect::<Vec<_>>()
                .join("; ");
            self.audit.write_log(
                "bulk_approval_partial",
                json!({ "alliance": summary.alliance, "detail": detail }),
                Severity::Error,
            );
            self.audit.notify_admin("approve-all", &detail).await;
        }

        Ok(Outcome::BulkApproved(summary))
    }

    fn alliance(&self, name: &str) -> Result<&Alliance, EngineError> {
        self.alliances
            .resolve(name)
            .ok_or_else(|| EngineError::Validation(format!("`{}` is not a known alliance", name)))
    }

    /// A pending record in this alliance is current even if the same username
    /// is pending elsewhere. Only a record that exists solely in another
    /// alliance means the command was issued against an outdated request.
    async fn ensure_current(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<(), EngineError> {
        if self
            .applications
            .find_pending_in(community_id, username, alliance)
            .await?
            .is_some()
        {
            return Ok(());
        }
        match self.applications.find_pending(community_id, username).await? {
            Some(record) => Err(Conflict::StaleRequest {
                username: record.username,
                requested: record.alliance,
                alliance: alliance.to_string(),
            }
            .into()),
            None => Err(not_pending(username, alliance)),
        }
    }

    /// Grants the alliance role, applies the display name and tells the
    /// applicant. Each effect is attempted regardless of the others.
    async fn apply_membership(
        &self,
        record: &ApplicationRecord,
        alliance: &Alliance,
    ) -> Vec<(&'static str, PlatformError)> {
        let mut failures = Vec::new();

        if let Err(e) = self
            .platform
            .grant_role(record.community_id, record.applicant_id, alliance.member_role())
            .await
        {
            failures.push(("role grant", e));
        }

        let nickname = member_display_name(&alliance.name, &record.username);
        if let Err(e) = self
            .platform
            .rename_member(record.community_id, record.applicant_id, &nickname)
            .await
        {
            failures.push(("rename", e));
        }

        let notice = format!(
            "Your application to join {} as `{}` was approved. Welcome!",
            alliance.name, record.username
        );
        if let Err(e) = self
            .platform
            .send_message(MessageTarget::User(record.applicant_id), &notice)
            .await
        {
            failures.push(("applicant notification", e));
        }

        failures
    }

    fn log_decision(&self, action: &str, actor: UserId, record: &ApplicationRecord) {
        self.audit.write_log(
            action,
            json!({
                "community_id": record.community_id.to_string(),
                "actor_id": actor.to_string(),
                "applicant_id": record.applicant_id.to_string(),
                "username": record.username,
                "alliance": record.alliance,
            }),
            Severity::Info,
        );
    }
}

fn not_pending(username: &str, alliance: &str) -> EngineError {
    EngineError::NotFound(format!(
        "No pending application for `{}` in {}.",
        username.to_lowercase(),
        alliance
    ))
}

fn describe(failures: &[(&'static str, PlatformError)]) -> String {
    failures
        .iter()
        .map(|(effect, e)| format!("{} failed ({})", effect, e))
        .collect::<Vec<_>>()
        .join(", ")
}

fn partial_success(record: &ApplicationRecord, failures: Vec<(&'static str, PlatformError)>) -> Option<EngineError> {
    let effect = failures.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(" and ");
    let (_, source) = failures.into_iter().next()?;
    Some(EngineError::PartialSuccess {
        committed: format!("`{}` approved into {}", record.username, record.alliance),
        effect,
        source,
    })
}
