use std::sync::Arc;

use crate::db::{Job, JobStatus};
use crate::registry::GroupRegistry;

/// A pending job handed to a worker, with the registry snapshot of its cycle.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job: Job,
    pub registry: Arc<GroupRegistry>,
}

impl WorkItem {
    pub fn new(job: Job, registry: Arc<GroupRegistry>) -> Self {
        Self { job, registry }
    }
}

/// What happened to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every routed group received its spreadsheet.
    Succeeded { delivered: Vec<String> },
    /// Terminal failure; `reason` is what was stored on the job.
    Failed { reason: String },
    /// Not processed: claimed elsewhere, or the pool was shutting down.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: String,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn success(job_id: &str, delivered: Vec<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome: JobOutcome::Succeeded { delivered },
        }
    }

    pub fn failure(job_id: &str, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome: JobOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn skipped(job_id: &str, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome: JobOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Terminal status written for this result, if any.
    pub fn status(&self) -> Option<JobStatus> {
        match self.outcome {
            JobOutcome::Succeeded { .. } => Some(JobStatus::Success),
            JobOutcome::Failed { .. } => Some(JobStatus::Failed),
            JobOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded { .. })
    }
}
