//! Drives polling and processing cycles and exposes the operator entry points.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{Config, MailboxConfig};
use crate::db::dispatch_repo::{self, DispatchRecord};
use crate::db::{job_repo, Database, Job, JobStatus, StatusCounts};
use crate::dispatch::Dispatcher;
use crate::email::{ImapClient, IngestReport, Ingestor, Mailbox, MailboxPoller};
use crate::error::{Result, SheetRelayError};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::registry::{GroupRegistry, RegistryHandle};
use crate::worker::{JobOutcome, JobResult, WorkItem, WorkerPool};

const MAX_STALE_SECS: i64 = 365 * 24 * 3600;

/// Outcome of one processing cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Stale `processing` jobs put back to `pending`.
    pub reclaimed: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip)]
    pub results: Vec<JobResult>,
}

impl CycleReport {
    fn tally(&mut self, results: Vec<JobResult>) {
        for result in &results {
            match result.outcome {
                JobOutcome::Succeeded { .. } => self.succeeded += 1,
                JobOutcome::Failed { .. } => self.failed += 1,
                JobOutcome::Skipped { .. } => self.skipped += 1,
            }
        }
        self.results = results;
    }
}

/// Timing and sizing knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    pub stale_after: chrono::Duration,
    pub poll_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.pipeline.worker_count,
            batch_size: config.pipeline.batch_size,
            stale_after: chrono::Duration::seconds(
                i64::try_from(config.pipeline.stale_after_secs)
                    .unwrap_or(i64::MAX)
                    .min(MAX_STALE_SECS),
            ),
            poll_interval: Duration::from_secs(config.mailbox.poll_interval_secs),
        }
    }
}

/// Groups file watched between cycles, with the stamp of the loaded version.
struct RegistrySource {
    path: PathBuf,
    known_regions: Vec<String>,
    stamp: Mutex<Option<FileStamp>>,
}

type FileStamp = (SystemTime, u64);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

pub struct Orchestrator {
    db: Database,
    registry: RegistryHandle,
    registry_source: Option<RegistrySource>,
    pipeline: Arc<Pipeline>,
    poller: MailboxPoller,
    ingestor: Ingestor,
    mailbox: Option<MailboxConfig>,
    settings: OrchestratorSettings,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        registry: RegistryHandle,
        pipeline: Arc<Pipeline>,
        poller: MailboxPoller,
        ingestor: Ingestor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            registry,
            registry_source: None,
            pipeline,
            poller,
            ingestor,
            mailbox: None,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the job store, loads the registry and sets up the relay.
    /// Any failure here is fatal for the process.
    pub fn from_config(config: &Config) -> Result<Self> {
        for dir in [config.inbox_dir(), config.outbox_dir()] {
            ensure_dir(&dir)?;
        }

        let db = open_store(config)?;
        let registry = GroupRegistry::load(&config.groups_path(), &config.known_region_list())?;

        let dispatcher = Dispatcher::from_config(&config.relay)?;
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::from_config(config)),
            db.clone(),
            dispatcher,
        ));

        let mut orchestrator = Self::new(
            db.clone(),
            RegistryHandle::new(registry),
            pipeline,
            MailboxPoller::from_config(&config.mailbox),
            Ingestor::new(db, config.inbox_dir()),
            OrchestratorSettings::from_config(config),
        )
        .with_registry_file(config.groups_path(), config.known_region_list());
        orchestrator.mailbox = Some(config.mailbox.clone());
        Ok(orchestrator)
    }

    /// Reloads the registry from `path` before a cycle whenever the file's
    /// modification time or size changes.
    pub fn with_registry_file(mut self, path: PathBuf, known_regions: Vec<String>) -> Self {
        let stamp = file_stamp(&path);
        self.registry_source = Some(RegistrySource {
            path,
            known_regions,
            stamp: Mutex::new(stamp),
        });
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Flag that stops new claims when set; shared with the signal handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Connects to the configured mailbox and runs one ingest pass.
    pub async fn poll_now(&self) -> Result<IngestReport> {
        let config = self.mailbox.clone().ok_or_else(|| {
            SheetRelayError::Email(crate::email::EmailError::ConnectionFailed(
                "no mailbox configured".to_string(),
            ))
        })?;

        let mut client = ImapClient::new(config);
        client.connect().await?;
        let report = self.poll_with(&mut client).await;
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "IMAP logout failed");
        }
        report
    }

    /// Opens and closes a session with the configured mailbox.
    pub async fn check_mailbox(&self) -> Result<()> {
        let config = self.mailbox.clone().ok_or_else(|| {
            SheetRelayError::Email(crate::email::EmailError::ConnectionFailed(
                "no mailbox configured".to_string(),
            ))
        })?;

        let mut client = ImapClient::new(config);
        client.connect().await?;
        client.disconnect().await?;
        Ok(())
    }

    /// Asks the outbound relay whether it is reachable.
    pub fn check_relay(&self) -> Result<()> {
        self.pipeline.dispatcher().check()?;
        Ok(())
    }

    /// Publishes a fresh registry when the groups file changed since the last
    /// load. A file that fails to load leaves the current snapshot in place.
    pub fn reload_registry_if_changed(&self) -> bool {
        let Some(source) = &self.registry_source else {
            return false;
        };
        let mut stamp = match source.stamp.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let current = file_stamp(&source.path);
        if current.is_none() || current == *stamp {
            return false;
        }
        *stamp = current;

        match GroupRegistry::load(&source.path, &source.known_regions) {
            Ok(registry) => {
                self.registry.publish(registry);
                info!("Group registry reloaded");
                true
            }
            Err(e) => {
                warn!(error = %e, "Groups file changed but failed to load, keeping previous registry");
                false
            }
        }
    }

    /// Runs one ingest pass against an already connected mailbox.
    pub async fn poll_with(&self, mailbox: &mut dyn Mailbox) -> Result<IngestReport> {
        let report = self
            .ingestor
            .ingest(&self.poller, mailbox)
            .instrument(info_span!("poll"))
            .await?;
        Ok(report)
    }

    /// Processes up to one batch of pending jobs on a fresh worker pool.
    ///
    /// Stale `processing` jobs are reclaimed first. All jobs of the cycle see
    /// the same registry snapshot.
    pub fn process_pending(&self) -> Result<CycleReport> {
        let _span = info_span!("process_pending").entered();
        let mut report = CycleReport {
            reclaimed: job_repo::reset_stale(&self.db, self.settings.stale_after)?,
            ..CycleReport::default()
        };
        if report.reclaimed > 0 {
            warn!(count = report.reclaimed, "Reclaimed stale jobs");
        }

        if self.is_shutting_down() {
            return Ok(report);
        }
        self.reload_registry_if_changed();

        let pending =
            job_repo::list_by_status(&self.db, JobStatus::Pending, Some(self.settings.batch_size))?;
        if pending.is_empty() {
            return Ok(report);
        }

        let registry = self.registry.snapshot();
        let pool = WorkerPool::with_shutdown_flag(
            Arc::clone(&self.pipeline),
            self.settings.worker_count.min(pending.len()),
            Arc::clone(&self.shutdown),
        )?;

        for job in pending {
            if let Err(e) = pool.submit(WorkItem::new(job, Arc::clone(&registry))) {
                warn!(error = %e, "Stopped submitting jobs");
                break;
            }
            report.submitted += 1;
        }

        report.tally(pool.wait());
        info!(
            submitted = report.submitted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Processing cycle complete"
        );
        Ok(report)
    }

    pub fn requeue_failed(&self) -> Result<usize> {
        requeue_failed(&self.db)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        status_counts(&self.db)
    }

    pub fn dispatch_history(&self, job_id: &str) -> Result<Vec<DispatchRecord>> {
        dispatch_history(&self.db, job_id)
    }

    pub fn find_job(&self, job_id: &str) -> Result<Option<Job>> {
        find_job(&self.db, job_id)
    }

    /// Polls and processes on the configured interval until shut down.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            "Orchestrator started"
        );

        loop {
            let stop = tokio::select! {
                _ = interval.tick() => false,
                _ = wait_for(Arc::clone(&self.shutdown)) => true,
            };
            if stop {
                break;
            }

            match self.poll_now().await {
                Ok(report) if report.admitted > 0 => {
                    info!(admitted = report.admitted, "New jobs admitted")
                }
                Ok(_) => {}
                Err(SheetRelayError::Email(e)) if e.is_transient() => {
                    warn!(error = %e, "Mailbox poll failed, retrying next cycle")
                }
                Err(e) => error!(error = %e, "Mailbox poll failed"),
            }

            if self.is_shutting_down() {
                break;
            }

            let this = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || this.process_pending()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "Processing cycle failed"),
                Err(e) => error!(error = %e, "Processing task panicked"),
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

async fn wait_for(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SheetRelayError::CreateDirectory {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Opens the job store named by the configuration, creating its directory.
pub fn open_store(config: &Config) -> Result<Database> {
    let path = config.database_file();
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(Database::open(&path)?)
}

/// Moves every failed job back to pending.
pub fn requeue_failed(db: &Database) -> Result<usize> {
    let count = job_repo::requeue_failed(db)?;
    info!(count, "Requeued failed jobs");
    Ok(count)
}

pub fn status_counts(db: &Database) -> Result<StatusCounts> {
    Ok(job_repo::count_by_status(db)?)
}

/// Per-group delivery records of one job.
pub fn dispatch_history(db: &Database, job_id: &str) -> Result<Vec<DispatchRecord>> {
    Ok(dispatch_repo::list_for_job(db, job_id)?)
}

pub fn find_job(db: &Database, job_id: &str) -> Result<Option<Job>> {
    Ok(job_repo::find_by_id(db, job_id)?)
}
