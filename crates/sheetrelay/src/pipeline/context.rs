use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::db::Job;
use crate::registry::GroupRegistry;
use crate::routing::{RegionColumn, RoutingResult};
use crate::sheet::Table;

use super::error::{GroupOutcome, PipelineError};

pub struct PipelineContext {
    // Input
    pub job: Job,
    pub registry: Arc<GroupRegistry>,
    pub deadline: Instant,

    // Step 1 result
    pub table: Option<Table>,

    // Step 2 result
    pub region_column: Option<RegionColumn>,

    // Step 3 result
    pub routing: Option<RoutingResult>,

    // Groups delivered by earlier attempts of this job
    pub already_delivered: HashSet<String>,

    // Step 4 results, in registry order
    pub outcomes: Vec<GroupOutcome>,
}

impl PipelineContext {
    pub fn new(job: Job, registry: Arc<GroupRegistry>, deadline: Instant) -> Self {
        Self {
            job,
            registry,
            deadline,
            table: None,
            region_column: None,
            routing: None,
            already_delivered: HashSet::new(),
            outcomes: Vec::new(),
        }
    }

    /// Fails once the job's deadline has passed.
    pub fn check_deadline(&self, step: &'static str) -> Result<(), PipelineError> {
        if Instant::now() >= self.deadline {
            Err(PipelineError::Timeout { step })
        } else {
            Ok(())
        }
    }
}
