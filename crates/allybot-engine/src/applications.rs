use std::sync::Arc;

use allybot_db::Database;
use allybot_types::models::{
    ApplicationRecord, ApplicationStatus, BatchApproval, SubmitOutcome, TransitionOutcome,
    normalize_username,
};
use allybot_types::{CommunityId, UserId};

use crate::error::{Conflict, EngineError};
use crate::run_blocking;

/// Applicant records. Usernames are matched case-insensitively everywhere.
#[derive(Clone)]
pub struct ApplicationStore {
    db: Arc<Database>,
}

impl ApplicationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn submit(
        &self,
        community_id: CommunityId,
        applicant_id: UserId,
        username: &str,
        alliance: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(EngineError::Validation("username must not be empty".into()));
        }
        let alliance = alliance.to_string();
        run_blocking(&self.db, move |db| {
            db.submit_application(community_id, applicant_id, &username, &alliance)
        })
        .await
    }

    pub async fn get_pending(
        &self,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<Vec<ApplicationRecord>, EngineError> {
        let alliance = alliance.to_string();
        run_blocking(&self.db, move |db| db.pending_applications(community_id, &alliance)).await
    }

    pub async fn find(
        &self,
        community_id: CommunityId,
        username: &str,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        let username = normalize_username(username);
        run_blocking(&self.db, move |db| db.find_application(community_id, &username)).await
    }

    /// Oldest pending record for the username, in any alliance.
    pub async fn find_pending(
        &self,
        community_id: CommunityId,
        username: &str,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        let username = normalize_username(username);
        run_blocking(&self.db, move |db| {
            db.find_pending_application(community_id, &username, None)
        })
        .await
    }

    /// Oldest pending record for the username in one alliance.
    pub async fn find_pending_in(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        let username = normalize_username(username);
        let alliance = alliance.to_string();
        run_blocking(&self.db, move |db| {
            db.find_pending_application(community_id, &username, Some(alliance.as_str()))
        })
        .await
    }

    /// Pending → Approved. `None` if no pending record for the username exists
    /// in that alliance, or another caller decided it first.
    pub async fn approve(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        self.decide(community_id, username, alliance, ApplicationStatus::Approved)
            .await
    }

    /// Pending → Rejected, symmetric to `approve`.
    pub async fn reject(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        self.decide(community_id, username, alliance, ApplicationStatus::Rejected)
            .await
    }

    /// Approves every pending record of the alliance independently.
    pub async fn approve_all(
        &self,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<BatchApproval, EngineError> {
        let alliance = alliance.to_string();
        run_blocking(&self.db, move |db| db.approve_all_pending(community_id, &alliance)).await
    }

    async fn decide(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: &str,
        to: ApplicationStatus,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        let username = normalize_username(username);
        let alliance = alliance.to_string();
        let lookup_name = username.clone();
        let outcome = run_blocking(&self.db, move |db| {
            let Some(record) = db.find_pending_application(community_id, &lookup_name, Some(alliance.as_str()))? else {
                return Ok(None);
            };
            db.transition_application(record.id, to).map(Some)
        })
        .await?;

        match outcome {
            None | Some(TransitionOutcome::NotPending) => Ok(None),
            Some(TransitionOutcome::Applied(record)) => Ok(Some(record)),
            Some(TransitionOutcome::UsernameTaken) => {
                Err(Conflict::DuplicateUsername { username }.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApplicationStore {
        ApplicationStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn lookups_are_case_insensitive() {
        let apps = store();
        let outcome = apps.submit(1, 10, "BoB", "NONA").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Created(ref r) if r.username == "bob"));
        assert!(apps.find(1, "BOB").await.unwrap().is_some());
        assert!(apps.find_pending(1, "bOb").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn approve_requires_matching_alliance() {
        let apps = store();
        apps.submit(1, 10, "bob", "NONA").await.unwrap();
        assert_eq!(apps.approve(1, "bob", "WOLF").await.unwrap(), None);

        let approved = apps.approve(1, "bob", "NONA").await.unwrap().unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);

        // Terminal
        assert_eq!(apps.approve(1, "bob", "NONA").await.unwrap(), None);
        assert_eq!(apps.reject(1, "bob", "NONA").await.unwrap(), None);
        assert_eq!(
            apps.find(1, "bob").await.unwrap().unwrap().status,
            ApplicationStatus::Approved
        );
    }

    #[tokio::test]
    async fn concurrent_approvals_have_one_winner() {
        let apps = store();
        apps.submit(1, 10, "bob", "NONA").await.unwrap();

        let (a, b) = tokio::join!(apps.approve(1, "bob", "NONA"), apps.approve(1, "bob", "NONA"));
        let winners = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn approving_a_taken_username_is_a_conflict() {
        let apps = store();
        apps.submit(1, 10, "bob", "NONA").await.unwrap();
        apps.submit(1, 11, "bob", "NONA").await.unwrap();
        apps.approve(1, "bob", "NONA").await.unwrap().unwrap();

        let err = apps.approve(1, "bob", "NONA").await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(Conflict::DuplicateUsername { .. })));
    }
}
