use allybot_types::models::{
    ApplicationRecord, ApplicationStatus, BatchApproval, BindOutcome, RoleBinding,
    SelectorMessage, SubmitOutcome, TransitionOutcome, UnbindOutcome,
};
use allybot_types::{ChannelId, CommunityId, MessageId, UserId};
use anyhow::{Result, bail};
use rusqlite::{Connection, Row, params};
use tracing::warn;

use crate::Database;
use crate::models::{ApplicationRow, from_sql_id, sql_id};

const APPLICATION_COLUMNS: &str =
    "id, community_id, applicant_id, username, alliance, status, created_at, decided_at";

impl Database {
    // -- Role bindings --

    pub fn upsert_role_binding(
        &self,
        community_id: CommunityId,
        emoji: &str,
        role_name: &str,
    ) -> Result<BindOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existed = tx
                .query_row(
                    "SELECT 1 FROM role_bindings WHERE community_id = ?1 AND emoji = ?2",
                    params![sql_id(community_id), emoji],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                "INSERT INTO role_bindings (community_id, emoji, role_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(community_id, emoji)
                 DO UPDATE SET role_name = excluded.role_name, updated_at = datetime('now')",
                params![sql_id(community_id), emoji, role_name],
            )?;
            tx.commit()?;

            Ok(if existed { BindOutcome::Replaced } else { BindOutcome::Created })
        })
    }

    pub fn delete_role_binding(&self, community_id: CommunityId, emoji: &str) -> Result<UnbindOutcome> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM role_bindings WHERE community_id = ?1 AND emoji = ?2",
                params![sql_id(community_id), emoji],
            )?;
            Ok(if removed > 0 { UnbindOutcome::Removed } else { UnbindOutcome::NotFound })
        })
    }

    pub fn get_role_binding(&self, community_id: CommunityId, emoji: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role_name FROM role_bindings WHERE community_id = ?1 AND emoji = ?2",
                params![sql_id(community_id), emoji],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn list_role_bindings(&self, community_id: CommunityId) -> Result<Vec<RoleBinding>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT emoji, role_name FROM role_bindings WHERE community_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([sql_id(community_id)], |row| {
                    Ok(RoleBinding {
                        community_id,
                        emoji: row.get(0)?,
                        role_name: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Selector messages --

    pub fn set_selector_message(
        &self,
        community_id: CommunityId,
        channel_id: Option<ChannelId>,
        message_id: MessageId,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO selector_messages (community_id, channel_id, message_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(community_id)
                 DO UPDATE SET channel_id = excluded.channel_id,
                               message_id = excluded.message_id,
                               updated_at = datetime('now')",
                params![sql_id(community_id), channel_id.map(sql_id), sql_id(message_id)],
            )?;
            Ok(())
        })
    }

    pub fn get_selector_message(&self, community_id: CommunityId) -> Result<Option<SelectorMessage>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT channel_id, message_id FROM selector_messages WHERE community_id = ?1",
                [sql_id(community_id)],
                |row| {
                    Ok(SelectorMessage {
                        community_id,
                        channel_id: row.get::<_, Option<i64>>(0)?.map(from_sql_id),
                        message_id: from_sql_id(row.get(1)?),
                    })
                },
            )
            .optional()
        })
    }

    // -- Reaction grant ledger --

    /// Last intent applied for this member and role: `Some(true)` granted,
    /// `Some(false)` revoked, `None` never touched.
    pub fn get_reaction_grant(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &str,
    ) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT granted FROM reaction_grants
                 WHERE community_id = ?1 AND user_id = ?2 AND role_name = ?3",
                params![sql_id(community_id), sql_id(user_id), role_name],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn set_reaction_grant(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_name: &str,
        granted: bool,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reaction_grants (community_id, user_id, role_name, granted) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(community_id, user_id, role_name)
                 DO UPDATE SET granted = excluded.granted, updated_at = datetime('now')",
                params![sql_id(community_id), sql_id(user_id), role_name, granted],
            )?;
            Ok(())
        })
    }

    // -- Applications --

    /// Creates a pending application unless the member already has one, was
    /// rejected, or the username already belongs to an approved member.
    pub fn submit_application(
        &self,
        community_id: CommunityId,
        applicant_id: UserId,
        username: &str,
        alliance: &str,
    ) -> Result<SubmitOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            // A rejection outranks everything: it blocks the member for good.
            let existing = query_one(
                &tx,
                &format!(
                    "SELECT {} FROM applications
                     WHERE community_id = ?1 AND applicant_id = ?2
                     ORDER BY CASE status WHEN 'rejected' THEN 0 WHEN 'approved' THEN 1 ELSE 2 END, id DESC
                     LIMIT 1",
                    APPLICATION_COLUMNS
                ),
                params![sql_id(community_id), sql_id(applicant_id)],
            )?;

            if let Some(record) = existing {
                return Ok(match record.status {
                    ApplicationStatus::Rejected => SubmitOutcome::RejectedBlocked,
                    ApplicationStatus::Approved => SubmitOutcome::AlreadyApproved(record),
                    ApplicationStatus::Pending => SubmitOutcome::AlreadyPending(record),
                });
            }

            if username_approved(&tx, community_id, username)? {
                return Ok(SubmitOutcome::DuplicateUsername);
            }

            tx.execute(
                "INSERT INTO applications (community_id, applicant_id, username, alliance) VALUES (?1, ?2, ?3, ?4)",
                params![sql_id(community_id), sql_id(applicant_id), username, alliance],
            )?;
            let id = tx.last_insert_rowid();
            let record = query_by_id(&tx, id)?;
            tx.commit()?;

            match record {
                Some(record) => Ok(SubmitOutcome::Created(record)),
                None => bail!("Application {} vanished after insert", id),
            }
        })
    }

    /// Pending applications for an alliance, oldest first.
    pub fn pending_applications(
        &self,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<Vec<ApplicationRecord>> {
        self.with_conn(|conn| {
            query_many(
                conn,
                &format!(
                    "SELECT {} FROM applications
                     WHERE community_id = ?1 AND alliance = ?2 AND status = 'pending'
                     ORDER BY id",
                    APPLICATION_COLUMNS
                ),
                params![sql_id(community_id), alliance],
            )
        })
    }

    /// Most relevant application for a username: approved, then pending, then rejected.
    pub fn find_application(
        &self,
        community_id: CommunityId,
        username: &str,
    ) -> Result<Option<ApplicationRecord>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM applications
                     WHERE community_id = ?1 AND username = ?2
                     ORDER BY CASE status WHEN 'approved' THEN 0 WHEN 'pending' THEN 1 ELSE 2 END, id DESC
                     LIMIT 1",
                    APPLICATION_COLUMNS
                ),
                params![sql_id(community_id), username],
            )
        })
    }

    /// Oldest pending application for a username, optionally restricted to one alliance.
    pub fn find_pending_application(
        &self,
        community_id: CommunityId,
        username: &str,
        alliance: Option<&str>,
    ) -> Result<Option<ApplicationRecord>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM applications
                     WHERE community_id = ?1 AND username = ?2 AND status = 'pending'
                       AND (?3 IS NULL OR alliance = ?3)
                     ORDER BY id
                     LIMIT 1",
                    APPLICATION_COLUMNS
                ),
                params![sql_id(community_id), username, alliance],
            )
        })
    }

    /// Compare-and-set out of `Pending`. Only one caller can win for a record.
    pub fn transition_application(&self, id: i64, to: ApplicationStatus) -> Result<TransitionOutcome> {
        if !to.is_terminal() {
            bail!("Applications can only move to a terminal status, not {}", to.as_str());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(current) = query_by_id(&tx, id)? else {
                return Ok(TransitionOutcome::NotPending);
            };
            if current.status.is_terminal() {
                return Ok(TransitionOutcome::NotPending);
            }
            if to == ApplicationStatus::Approved
                && username_approved(&tx, current.community_id, &current.username)?
            {
                return Ok(TransitionOutcome::UsernameTaken);
            }

            let changed = tx.execute(
                "UPDATE applications SET status = ?2, decided_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id, to.as_str()],
            )?;
            if changed == 0 {
                return Ok(TransitionOutcome::NotPending);
            }

            let record = query_by_id(&tx, id)?;
            tx.commit()?;

            match record {
                Some(record) => Ok(TransitionOutcome::Applied(record)),
                None => bail!("Application {} vanished during transition", id),
            }
        })
    }

    /// Approves every pending application of an alliance, one record at a
    /// time. A failure on one record is collected and the rest continue.
    pub fn approve_all_pending(&self, community_id: CommunityId, alliance: &str) -> Result<BatchApproval> {
        let pending = self.pending_applications(community_id, alliance)?;
        let mut batch = BatchApproval::default();

        for record in pending {
            match self.transition_application(record.id, ApplicationStatus::Approved) {
                Ok(TransitionOutcome::Applied(approved)) => batch.approved.push(approved),
                Ok(TransitionOutcome::NotPending) => {
                    batch.failed.push((record, "no longer pending".to_string()));
                }
                Ok(TransitionOutcome::UsernameTaken) => {
                    batch.failed.push((record, "username already approved".to_string()));
                }
                Err(e) => {
                    warn!("Approving application {} failed: {:#}", record.id, e);
                    batch.failed.push((record, e.to_string()));
                }
            }
        }

        Ok(batch)
    }
}

fn username_approved(conn: &Connection, community_id: CommunityId, username: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM applications WHERE community_id = ?1 AND username = ?2 AND status = 'approved'",
            params![sql_id(community_id), username],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn query_by_id(conn: &Connection, id: i64) -> Result<Option<ApplicationRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM applications WHERE id = ?1", APPLICATION_COLUMNS),
        [id],
    )
}

fn query_one<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<ApplicationRecord>> {
    let row = conn.query_row(sql, params, application_row).optional()?;
    row.map(ApplicationRow::into_record).transpose()
}

fn query_many<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ApplicationRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, application_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(ApplicationRow::into_record).collect()
}

fn application_row(row: &Row<'_>) -> rusqlite::Result<ApplicationRow> {
    Ok(ApplicationRow {
        id: row.get(0)?,
        community_id: row.get(1)?,
        applicant_id: row.get(2)?,
        username: row.get(3)?,
        alliance: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        decided_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: CommunityId = 1000;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn created(outcome: SubmitOutcome) -> ApplicationRecord {
        match outcome {
            SubmitOutcome::Created(record) => record,
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn bind_twice_is_idempotent() {
        let db = db();
        assert_eq!(db.upsert_role_binding(C, "✅", "Member").unwrap(), BindOutcome::Created);
        assert_eq!(db.upsert_role_binding(C, "✅", "Member").unwrap(), BindOutcome::Replaced);
        assert_eq!(db.get_role_binding(C, "✅").unwrap().as_deref(), Some("Member"));
        assert_eq!(db.list_role_bindings(C).unwrap().len(), 1);
    }

    #[test]
    fn bindings_are_scoped_per_community() {
        let db = db();
        db.upsert_role_binding(C, "✅", "Member").unwrap();
        db.upsert_role_binding(C + 1, "✅", "Guest").unwrap();
        assert_eq!(db.get_role_binding(C, "✅").unwrap().as_deref(), Some("Member"));
        assert_eq!(db.get_role_binding(C + 1, "✅").unwrap().as_deref(), Some("Guest"));
    }

    #[test]
    fn unbind_missing_is_not_an_error() {
        let db = db();
        db.upsert_role_binding(C, "🐺", "Wolf").unwrap();
        assert_eq!(db.delete_role_binding(C, "🐺").unwrap(), UnbindOutcome::Removed);
        assert_eq!(db.delete_role_binding(C, "🐺").unwrap(), UnbindOutcome::NotFound);
        assert_eq!(db.get_role_binding(C, "🐺").unwrap(), None);
    }

    #[test]
    fn selector_message_is_overwritten() {
        let db = db();
        assert_eq!(db.get_selector_message(C).unwrap(), None);
        db.set_selector_message(C, Some(5), 10).unwrap();
        db.set_selector_message(C, None, 11).unwrap();
        let selector = db.get_selector_message(C).unwrap().unwrap();
        assert_eq!(selector.message_id, 11);
        assert_eq!(selector.channel_id, None);
    }

    #[test]
    fn reaction_ledger_tracks_last_intent() {
        let db = db();
        assert_eq!(db.get_reaction_grant(C, 7, "Member").unwrap(), None);
        db.set_reaction_grant(C, 7, "Member", true).unwrap();
        assert_eq!(db.get_reaction_grant(C, 7, "Member").unwrap(), Some(true));
        db.set_reaction_grant(C, 7, "Member", false).unwrap();
        assert_eq!(db.get_reaction_grant(C, 7, "Member").unwrap(), Some(false));
    }

    #[test]
    fn resubmission_while_pending_is_refused() {
        let db = db();
        created(db.submit_application(C, 1, "bob", "NONA").unwrap());
        let again = db.submit_application(C, 1, "bobby", "WOLF").unwrap();
        assert!(matches!(again, SubmitOutcome::AlreadyPending(ref r) if r.alliance == "NONA"));
        assert_eq!(db.pending_applications(C, "WOLF").unwrap().len(), 0);
    }

    #[test]
    fn rejection_blocks_future_submissions() {
        let db = db();
        let record = created(db.submit_application(C, 1, "bob", "NONA").unwrap());
        assert!(matches!(
            db.transition_application(record.id, ApplicationStatus::Rejected).unwrap(),
            TransitionOutcome::Applied(_)
        ));
        assert_eq!(
            db.submit_application(C, 1, "bob", "WOLF").unwrap(),
            SubmitOutcome::RejectedBlocked
        );
        // Other communities are unaffected
        created(db.submit_application(C + 1, 1, "bob", "NONA").unwrap());
    }

    #[test]
    fn approved_username_cannot_be_reused() {
        let db = db();
        let record = created(db.submit_application(C, 1, "bob", "NONA").unwrap());
        db.transition_application(record.id, ApplicationStatus::Approved).unwrap();

        assert!(matches!(
            db.submit_application(C, 1, "other", "NONA").unwrap(),
            SubmitOutcome::AlreadyApproved(_)
        ));
        assert_eq!(
            db.submit_application(C, 2, "bob", "NONA").unwrap(),
            SubmitOutcome::DuplicateUsername
        );
    }

    #[test]
    fn transition_is_compare_and_set() {
        let db = db();
        let record = created(db.submit_application(C, 1, "bob", "NONA").unwrap());

        let first = db.transition_application(record.id, ApplicationStatus::Approved).unwrap();
        let TransitionOutcome::Applied(approved) = first else {
            panic!("first transition should win");
        };
        assert_eq!(approved.status, ApplicationStatus::Approved);
        assert!(approved.decided_at.is_some());

        // Terminal: neither a second approve nor a reject changes anything
        assert_eq!(
            db.transition_application(record.id, ApplicationStatus::Approved).unwrap(),
            TransitionOutcome::NotPending
        );
        assert_eq!(
            db.transition_application(record.id, ApplicationStatus::Rejected).unwrap(),
            TransitionOutcome::NotPending
        );
        assert_eq!(
            db.find_application(C, "bob").unwrap().unwrap().status,
            ApplicationStatus::Approved
        );
        assert!(db.transition_application(record.id, ApplicationStatus::Pending).is_err());
    }

    #[test]
    fn pending_is_not_a_transition_target() {
        let db = db();
        let record = created(db.submit_application(C, 1, "bob", "NONA").unwrap());

        let err = db.transition_application(record.id, ApplicationStatus::Pending).unwrap_err();
        assert!(err.to_string().contains("terminal"));
        let stored = db.find_application(C, "bob").unwrap().unwrap();
        assert_eq!(stored.status, ApplicationStatus::Pending);
        assert_eq!(stored.decided_at, None);
    }

    #[test]
    fn approving_a_second_pending_duplicate_username_fails() {
        let db = db();
        let first = created(db.submit_application(C, 1, "bob", "NONA").unwrap());
        let second = created(db.submit_application(C, 2, "bob", "NONA").unwrap());
        db.transition_application(first.id, ApplicationStatus::Approved).unwrap();
        assert_eq!(
            db.transition_application(second.id, ApplicationStatus::Approved).unwrap(),
            TransitionOutcome::UsernameTaken
        );
    }

    #[test]
    fn approve_all_isolates_failures() {
        let db = db();
        created(db.submit_application(C, 1, "alice", "NONA").unwrap());
        created(db.submit_application(C, 2, "bob", "NONA").unwrap());
        created(db.submit_application(C, 3, "bob", "NONA").unwrap());
        created(db.submit_application(C, 4, "carol", "WOLF").unwrap());

        let batch = db.approve_all_pending(C, "NONA").unwrap();
        let approved: Vec<_> = batch.approved.iter().map(|r| r.applicant_id).collect();
        assert_eq!(approved, vec![1, 2]);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0.applicant_id, 3);

        // The other alliance is untouched
        assert_eq!(db.pending_applications(C, "WOLF").unwrap().len(), 1);
    }

    #[test]
    fn pending_list_keeps_insertion_order() {
        let db = db();
        for (user, name) in [(3, "c"), (1, "a"), (2, "b")] {
            created(db.submit_application(C, user, name, "NONA").unwrap());
        }
        let names: Vec<_> = db
            .pending_applications(C, "NONA")
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn find_prefers_live_records() {
        let db = db();
        let rejected = created(db.submit_application(C, 1, "bob", "NONA").unwrap());
        db.transition_application(rejected.id, ApplicationStatus::Rejected).unwrap();
        let pending = created(db.submit_application(C, 2, "bob", "NONA").unwrap());

        let found = db.find_application(C, "bob").unwrap().unwrap();
        assert_eq!(found.id, pending.id);
        assert_eq!(db.find_pending_application(C, "bob", None).unwrap().unwrap().id, pending.id);
        assert_eq!(
            db.find_pending_application(C, "bob", Some("NONA")).unwrap().unwrap().id,
            pending.id
        );
        assert_eq!(db.find_pending_application(C, "bob", Some("WOLF")).unwrap(), None);
        assert_eq!(db.find_application(C, "nobody").unwrap(), None);
    }
}
