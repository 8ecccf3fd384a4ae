//! Job repository: admission and status transitions for the `jobs` table.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, now_timestamp, Database, DatabaseError};

/// Processing state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Success,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DatabaseError::UnknownStatus(other.to_string())),
        }
    }
}

/// One ingested attachment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub sender: String,
    pub filename: String,
    pub subject: String,
    pub stored_path: String,
    pub status: JobStatus,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub processed_at: Option<String>,
    pub error: Option<String>,
    pub size_bytes: Option<u64>,
}

impl Job {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            sender: row.get("sender")?,
            filename: row.get("filename")?,
            subject: row.get("subject")?,
            stored_path: row.get("stored_path")?,
            status,
            created_at: row.get("created_at")?,
            claimed_at: row.get("claimed_at")?,
            processed_at: row.get("processed_at")?,
            error: row.get("error")?,
            size_bytes: row.get("size_bytes")?,
        })
    }
}

/// Result of [`admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub job_id: String,
    /// False when a job with the same identity already existed.
    pub is_new: bool,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub last_processed_at: Option<String>,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.success + self.failed
    }
}

/// Deterministic job identity: lower-cased sender address plus filename.
///
/// Re-sending a file under the same name from the same sender maps to the same
/// job, whatever the content.
pub fn job_key(sender: &str, filename: &str) -> String {
    format!("{}/{}", sender.trim().to_lowercase(), filename)
}

/// Records a new pending job, or returns the existing one with `is_new = false`.
pub fn admit(
    db: &Database,
    sender: &str,
    filename: &str,
    stored_path: &str,
    subject: &str,
    size_bytes: Option<u64>,
) -> Result<Admission, DatabaseError> {
    let id = job_key(sender, filename);
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO jobs (id, sender, filename, subject, stored_path, status,
             created_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
            params![
                id,
                sender.trim().to_lowercase(),
                filename,
                subject,
                stored_path,
                now_timestamp(),
                size_bytes,
            ],
        )?;
        Ok(Admission {
            job_id: id.clone(),
            is_new: inserted == 1,
        })
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], Job::from_row)
            .optional()?;
        Ok(job)
    })
}

/// Snapshot of jobs in `status`, oldest first.
pub fn list_by_status(
    db: &Database,
    status: JobStatus,
    limit: Option<usize>,
) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT ?2",
        )?;
        let jobs = stmt
            .query_map(params![status.as_str(), limit], Job::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    })
}

/// Moves a job to `to` if its current status is one of `from`.
///
/// Returns `Ok(false)` when the job is missing or in another status, which
/// callers treat as "someone else already moved it". Entering `processing`
/// stamps `claimed_at`; entering a terminal status stamps `processed_at`;
/// returning to `pending` clears both.
pub fn transition(
    db: &Database,
    id: &str,
    from: &[JobStatus],
    to: JobStatus,
    error: Option<&str>,
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }

    let placeholders = (0..from.len())
        .map(|i| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE jobs SET
            status = ?1,
            error = ?2,
            claimed_at = CASE
                WHEN ?1 = 'processing' THEN ?3
                WHEN ?1 = 'pending' THEN NULL
                ELSE claimed_at END,
            processed_at = CASE
                WHEN ?1 IN ('success', 'failed') THEN ?3
                WHEN ?1 = 'pending' THEN NULL
                ELSE processed_at END
         WHERE id = ?4 AND status IN ({})",
        placeholders
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(to.as_str()),
        Box::new(error.map(str::to_string)),
        Box::new(now_timestamp()),
        Box::new(id.to_string()),
    ];
    param_values.extend(
        from.iter()
            .map(|s| Box::new(s.as_str()) as Box<dyn rusqlite::types::ToSql>),
    );

    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let changed = tx.execute(&sql, params_ref.as_slice())?;
        tx.commit()?;
        Ok(changed == 1)
    })
}

/// Moves every failed job back to pending. Returns the number requeued.
pub fn requeue_failed(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let n = tx.execute(
            "UPDATE jobs SET status = 'pending', error = NULL, claimed_at = NULL,
             processed_at = NULL WHERE status = 'failed'",
            [],
        )?;
        tx.commit()?;
        Ok(n)
    })
}

/// Resets `processing` jobs claimed before `now - older_than` to `pending`.
pub fn reset_stale(db: &Database, older_than: chrono::Duration) -> Result<usize, DatabaseError> {
    let cutoff = format_timestamp(chrono::Utc::now() - older_than);
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let n = tx.execute(
            "UPDATE jobs SET status = 'pending', claimed_at = NULL
             WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at < ?1)",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(n)
    })
}

/// Counts jobs per status.
pub fn count_by_status(db: &Database) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut counts = StatusCounts::default();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Processing => counts.processing = count,
                JobStatus::Success => counts.success = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        counts.last_processed_at =
            conn.query_row("SELECT MAX(processed_at) FROM jobs", [], |r| r.get(0))?;
        Ok(counts)
    })
}
