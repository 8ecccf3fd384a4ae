//! Per-group dispatch ledger.
//!
//! One row per (job, group). A group marked delivered is skipped when the job
//! is retried, so a requeue only re-sends to the groups that failed.

use std::collections::HashSet;

use rusqlite::{params, Row};
use serde::Serialize;

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Delivered,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Delivered => "delivered",
            DispatchStatus::Failed => "failed",
        }
    }
}

/// A stored dispatch outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRecord {
    pub job_id: String,
    pub group_id: String,
    pub status: DispatchStatus,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub updated_at: String,
}

impl DispatchRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = match status.as_str() {
            "delivered" => DispatchStatus::Delivered,
            "failed" => DispatchStatus::Failed,
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(DatabaseError::UnknownStatus(other.to_string())),
                ))
            }
        };
        Ok(Self {
            job_id: row.get("job_id")?,
            group_id: row.get("group_id")?,
            status,
            output_path: row.get("output_path")?,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or overwrites the outcome for (job, group).
pub fn record(
    db: &Database,
    job_id: &str,
    group_id: &str,
    status: DispatchStatus,
    output_path: Option<&str>,
    error: Option<&str>,
    attempts: u32,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO dispatches (job_id, group_id, status, output_path, error, attempts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (job_id, group_id) DO UPDATE SET
                status = excluded.status,
                output_path = excluded.output_path,
                error = excluded.error,
                attempts = dispatches.attempts + excluded.attempts,
                updated_at = excluded.updated_at",
            params![
                job_id,
                group_id,
                status.as_str(),
                output_path,
                error,
                attempts,
                now_timestamp(),
            ],
        )?;
        Ok(())
    })
}

/// Group ids already delivered for a job.
pub fn delivered_groups(db: &Database, job_id: &str) -> Result<HashSet<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT group_id FROM dispatches WHERE job_id = ?1 AND status = 'delivered'",
        )?;
        let groups = stmt
            .query_map(params![job_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(groups)
    })
}

/// All dispatch records for a job, by group id.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<DispatchRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM dispatches WHERE job_id = ?1 ORDER BY group_id")?;
        let records = stmt
            .query_map(params![job_id], DispatchRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;

    fn db_with_job() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let job = job_repo::admit(&db, "a@example.com", "r.xlsx", "/inbox/r.xlsx", "", None)
            .unwrap()
            .job_id;
        (db, job)
    }

    #[test]
    fn test_record_and_list() {
        let (db, job) = db_with_job();
        record(&db, &job, "G2", DispatchStatus::Failed, None, Some("rejected"), 1).unwrap();
        record(&db, &job, "G1", DispatchStatus::Delivered, Some("/out/g1.xlsx"), None, 1).unwrap();

        let records = list_for_job(&db, &job).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].group_id, "G1");
        assert_eq!(records[0].status, DispatchStatus::Delivered);
        assert_eq!(records[1].error.as_deref(), Some("rejected"));

        let delivered = delivered_groups(&db, &job).unwrap();
        assert!(delivered.contains("G1"));
        assert!(!delivered.contains("G2"));
    }

    #[test]
    fn test_record_upsert_accumulates_attempts() {
        let (db, job) = db_with_job();
        record(&db, &job, "G1", DispatchStatus::Failed, None, Some("timeout"), 3).unwrap();
        record(&db, &job, "G1", DispatchStatus::Delivered, Some("/o.xlsx"), None, 1).unwrap();

        let records = list_for_job(&db, &job).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DispatchStatus::Delivered);
        assert_eq!(records[0].attempts, 4);
        assert!(records[0].error.is_none());
    }

    #[test]
    fn test_record_requires_existing_job() {
        let db = Database::open_in_memory().unwrap();
        let result = record(&db, "missing/job.xlsx", "G1", DispatchStatus::Delivered, None, None, 1);
        assert!(result.is_err());
    }
}
