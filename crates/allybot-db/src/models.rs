//! Database row types. These map directly to SQLite rows; conversion into the
//! shared domain models happens here so the query layer stays flat.
use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};

use allybot_types::models::{ApplicationRecord, ApplicationStatus};

pub struct ApplicationRow {
    pub id: i64,
    pub community_id: i64,
    pub applicant_id: i64,
    pub username: String,
    pub alliance: String,
    pub status: String,
    pub created_at: String,
    pub decided_at: Option<String>,
}

impl ApplicationRow {
    pub fn into_record(self) -> Result<ApplicationRecord> {
        let status = ApplicationStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("Corrupt status '{}' on application {}", self.status, self.id))?;

        Ok(ApplicationRecord {
            id: self.id,
            community_id: from_sql_id(self.community_id),
            applicant_id: from_sql_id(self.applicant_id),
            username: self.username,
            alliance: self.alliance,
            status,
            created_at: parse_timestamp(&self.created_at)?,
            decided_at: self.decided_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Snowflakes are stored bit-for-bit in SQLite's signed INTEGER.
pub fn sql_id(id: u64) -> i64 {
    id as i64
}

pub fn from_sql_id(id: i64) -> u64 {
    id as u64
}

// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_snowflakes_survive_storage() {
        let id = u64::MAX - 5;
        assert_eq!(from_sql_id(sql_id(id)), id);
    }

    #[test]
    fn corrupt_status_is_an_error() {
        let row = ApplicationRow {
            id: 1,
            community_id: 1,
            applicant_id: 2,
            username: "bob".into(),
            alliance: "NONA".into(),
            status: "archived".into(),
            created_at: "2024-01-01 00:00:00".into(),
            decided_at: None,
        };
        assert!(row.into_record().is_err());
    }
}
