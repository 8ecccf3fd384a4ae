use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use crate::aggregate::{Aggregator, SourceFile};
use crate::db::dispatch_repo::{self, DispatchStatus};
use crate::db::{job_repo, Database, JobStatus};
use crate::dispatch::{render, DispatchError, Dispatcher, TemplateVars};
use crate::routing::{self, GroupRoute};
use crate::sanitize;
use crate::sheet;
use crate::worker::job::{JobResult, WorkItem};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{GroupOutcome, PipelineError};

/// Job budgets above this are clamped.
const MAX_JOB_BUDGET: Duration = Duration::from_secs(24 * 3600);

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    db: Database,
    aggregator: Aggregator,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, db: Database, dispatcher: Dispatcher) -> Self {
        let aggregator = Aggregator::new(&config.output_directory, config.aggregation);
        Self {
            config,
            db,
            aggregator,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Claims a pending job, runs it and writes its terminal status.
    ///
    /// A job that is no longer pending is returned as skipped without being
    /// touched.
    pub fn execute(&self, item: WorkItem) -> JobResult {
        let WorkItem { job, registry } = item;

        match job_repo::transition(
            &self.db,
            &job.id,
            &[JobStatus::Pending],
            JobStatus::Processing,
            None,
        ) {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "Job already claimed, skipping");
                return JobResult::skipped(&job.id, "already claimed");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to claim job");
                return JobResult::skipped(&job.id, format!("claim failed: {}", e));
            }
        }

        let now = Instant::now();
        let budget = self.config.job_timeout.min(MAX_JOB_BUDGET);
        let deadline = now.checked_add(budget).unwrap_or(now);
        let ctx = PipelineContext::new(job, registry, deadline);
        let (result, _ctx) = self.run(ctx);
        result
    }

    /// Runs all steps for a claimed job and records the terminal status.
    /// Returns a (JobResult, PipelineContext) pair.
    pub fn run(&self, mut ctx: PipelineContext) -> (JobResult, PipelineContext) {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.id,
            filename = %sanitize::redact_path(Path::new(&ctx.job.stored_path)),
            sender = %sanitize::redact_address(&ctx.job.sender),
        )
        .entered();

        let outcome = self.run_steps(&mut ctx);
        let result = self.finish(&ctx, outcome);
        (result, ctx)
    }

    fn run_steps(&self, ctx: &mut PipelineContext) -> Result<Vec<String>, PipelineError> {
        // Step 1: Read spreadsheet
        {
            let _step = info_span!("read_spreadsheet").entered();
            ctx.check_deadline("read_spreadsheet")?;
            let table = sheet::read_table(Path::new(&ctx.job.stored_path))?;
            debug!(
                rows = table.rows.len(),
                columns = table.width(),
                size_bytes = ?ctx.job.size_bytes,
                "Spreadsheet loaded"
            );
            ctx.table = Some(table);
        }

        // Step 2: Find region column
        {
            let _step = info_span!("find_region_column").entered();
            ctx.check_deadline("find_region_column")?;
            let table = ctx.table.as_ref().ok_or(PipelineError::Timeout {
                step: "find_region_column",
            })?;
            let column = routing::find_region_column(table, &ctx.registry)?;
            debug!(column = column.index, matched_by = ?column.matched_by, "Region column found");
            ctx.region_column = Some(column);
        }

        // Step 3: Resolve rows to groups
        {
            let _step = info_span!("resolve").entered();
            ctx.check_deadline("resolve")?;
            let (Some(table), Some(column)) = (ctx.table.as_ref(), ctx.region_column.as_ref())
            else {
                return Err(PipelineError::NoDestinationMatch);
            };
            let routing = routing::resolve(table, column.index, &ctx.registry);
            info!(
                groups = routing.routes.len(),
                unmatched = routing.unmatched_rows,
                blank = routing.blank_rows,
                "Rows resolved"
            );
            if routing.is_empty() {
                return Err(PipelineError::NoDestinationMatch);
            }
            ctx.routing = Some(routing);
        }

        // Step 4: Aggregate and dispatch per group
        {
            let _step = info_span!("dispatch_groups").entered();
            ctx.already_delivered = dispatch_repo::delivered_groups(&self.db, &ctx.job.id)?;
            let routes = ctx
                .routing
                .as_ref()
                .map(|r| r.routes.clone())
                .unwrap_or_default();

            for route in &routes {
                let outcome = self.deliver_group(ctx, route)?;
                ctx.outcomes.push(outcome);
            }
        }

        let failed: Vec<&GroupOutcome> = ctx.outcomes.iter().filter(|o| !o.delivered).collect();
        if let Some(first) = failed.first() {
            return Err(PipelineError::DispatchFailed {
                groups: failed.iter().map(|o| o.group_id.clone()).collect(),
                first_error: first.error.clone().unwrap_or_default(),
            });
        }

        Ok(ctx.outcomes.iter().map(|o| o.group_id.clone()).collect())
    }

    fn deliver_group(
        &self,
        ctx: &PipelineContext,
        route: &GroupRoute,
    ) -> Result<GroupOutcome, PipelineError> {
        let _group_span = info_span!("group", group = %route.group_id).entered();

        if ctx.already_delivered.contains(&route.group_id) {
            info!("Group already delivered by an earlier attempt, skipping");
            return Ok(GroupOutcome {
                group_id: route.group_id.clone(),
                delivered: true,
                error: None,
            });
        }

        ctx.check_deadline("dispatch")?;

        let failed = |reason: String, attempts: u32, output: Option<&str>| {
            warn!(error = %reason, "Group delivery failed");
            dispatch_repo::record(
                &self.db,
                &ctx.job.id,
                &route.group_id,
                DispatchStatus::Failed,
                output,
                Some(&reason),
                attempts,
            )?;
            Ok::<_, PipelineError>(GroupOutcome {
                group_id: route.group_id.clone(),
                delivered: false,
                error: Some(reason),
            })
        };

        let Some(group) = ctx.registry.get(&route.group_id) else {
            return failed(format!("unknown group '{}'", route.group_id), 0, None);
        };

        let sources = [SourceFile::new(&ctx.job.stored_path, route.rows.clone())];
        let output = match self.aggregator.aggregate(group.id(), &sources) {
            Ok(path) => path,
            Err(e) => return failed(e.to_string(), 0, None),
        };
        let output_str = output.to_string_lossy().into_owned();

        let vars = TemplateVars {
            group_id: group.id(),
            group_name: group.display_name(),
            sender: &ctx.job.sender,
            filename: &ctx.job.filename,
        };
        let subject = render(&self.config.subject_template, &vars);
        let body = render(&self.config.body_template, &vars);

        match self.dispatcher.dispatch_until(
            group.destination_address(),
            &subject,
            &body,
            &output,
            Some(ctx.deadline),
        ) {
            Ok(receipt) => {
                dispatch_repo::record(
                    &self.db,
                    &ctx.job.id,
                    group.id(),
                    DispatchStatus::Delivered,
                    Some(&output_str),
                    None,
                    receipt.attempts,
                )?;
                Ok(GroupOutcome {
                    group_id: route.group_id.clone(),
                    delivered: true,
                        error: None,
                })
            }
            Err(e @ DispatchError::DeadlineExceeded { .. }) => {
                failed(e.to_string(), e.attempts(), Some(&output_str))?;
                Err(PipelineError::Timeout { step: "dispatch" })
            }
            Err(e) => failed(e.to_string(), e.attempts(), Some(&output_str)),
        }
    }

    fn finish(
        &self,
        ctx: &PipelineContext,
        outcome: Result<Vec<String>, PipelineError>,
    ) -> JobResult {
        let (status, error, result) = match outcome {
            Ok(delivered) => {
                info!(groups = delivered.len(), "Job succeeded");
                (
                    JobStatus::Success,
                    None,
                    JobResult::success(&ctx.job.id, delivered),
                )
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(reason = %reason, "Job failed");
                (
                    JobStatus::Failed,
                    Some(reason.clone()),
                    JobResult::failure(&ctx.job.id, reason),
                )
            }
        };

        match job_repo::transition(
            &self.db,
            &ctx.job.id,
            &[JobStatus::Processing],
            status,
            error.as_deref(),
        ) {
            Ok(true) => {}
            Ok(false) => warn!(status = %status, "Job left processing before its result was stored"),
            Err(e) => error!(error = %e, "Failed to store job status"),
        }
        result
    }
}
