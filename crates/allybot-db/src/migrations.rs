use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (role bindings, selector messages, applications)");
        conn.execute_batch(
            "
            CREATE TABLE role_bindings (
                community_id    INTEGER NOT NULL,
                emoji           TEXT NOT NULL,
                role_name       TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (community_id, emoji)
            );

            CREATE TABLE selector_messages (
                community_id    INTEGER PRIMARY KEY,
                channel_id      INTEGER,
                message_id      INTEGER NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE applications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id    INTEGER NOT NULL,
                applicant_id    INTEGER NOT NULL,
                username        TEXT NOT NULL,
                alliance        TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'approved', 'rejected')),
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                decided_at      TEXT
            );

            -- At most one live (pending or approved) application per member
            CREATE UNIQUE INDEX idx_applications_live_applicant
                ON applications(community_id, applicant_id)
                WHERE status != 'rejected';

            -- Approved usernames never collide within a community
            CREATE UNIQUE INDEX idx_applications_approved_username
                ON applications(community_id, username)
                WHERE status = 'approved';

            CREATE INDEX idx_applications_alliance
                ON applications(community_id, alliance, status, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (reaction grant ledger)");
        conn.execute_batch(
            "
            CREATE TABLE reaction_grants (
                community_id    INTEGER NOT NULL,
                user_id         INTEGER NOT NULL,
                role_name       TEXT NOT NULL,
                granted         INTEGER NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (community_id, user_id, role_name)
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
