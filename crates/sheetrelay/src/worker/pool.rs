use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::worker::job::{JobResult, WorkItem};

/// Fixed set of threads pulling work items from a bounded queue.
pub struct WorkerPool {
    job_sender: Sender<WorkItem>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads (at least one). The queue holds twice as
    /// many items as there are workers; `submit` blocks when it is full.
    ///
    /// Once `shutdown` is set, queued items come back as skipped and jobs
    /// already running finish normally.
    pub fn with_shutdown_flag(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<WorkItem>(worker_count * 2);
        let (result_sender, result_receiver) = unbounded::<JobResult>();

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = Arc::clone(&pipeline);

            let handle = thread::Builder::new()
                .name(format!("sheetrelay-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_pipeline);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ShuttingDown);
        }

        self.job_sender
            .send(item)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Closes the queue, joins all workers and returns every result.
    pub fn wait(self) -> Vec<JobResult> {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
        self.result_receiver.try_iter().collect()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<WorkItem>,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => {
                let result = if shutdown.load(Ordering::Relaxed) {
                    JobResult::skipped(&item.job.id, "shutting down")
                } else {
                    debug!("Worker {} processing job {}", worker_id, item.job.id);
                    pipeline.execute(item)
                };

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) && job_receiver.is_empty() {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationMode;
    use crate::db::{job_repo, Database, JobStatus};
    use crate::dispatch::{Dispatcher, MailRelay, RelayError, RetryPolicy};
    use crate::pipeline::PipelineConfig;
    use crate::registry::{DestinationGroup, GroupRegistry};
    use crate::sheet::{self, Cell, Table};
    use crate::worker::JobOutcome;
    use lettre::Message;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingRelay {
        sent: AtomicUsize,
    }

    impl MailRelay for CountingRelay {
        fn send(&self, _message: &Message) -> Result<(), RelayError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(dir: &TempDir, relay: Arc<CountingRelay>) -> (Database, Arc<Pipeline>, Arc<GroupRegistry>) {
        let db = Database::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(
            relay,
            "relay@example.com",
            None,
            RetryPolicy::default(),
            1024 * 1024,
        )
        .unwrap();
        let config = Arc::new(PipelineConfig {
            output_directory: dir.path().join("outbox"),
            aggregation: AggregationMode::WholeFile,
            job_timeout: Duration::from_secs(60),
            subject_template: "{group_id}".to_string(),
            body_template: String::new(),
        });
        let registry = Arc::new(
            GroupRegistry::new(
                vec![DestinationGroup::new("G1", "One", "g1@example.com", ["ANKARA"]).unwrap()],
                ["ANKARA"],
            )
            .unwrap(),
        );
        let pipeline = Arc::new(Pipeline::new(config, db.clone(), dispatcher));
        (db, pipeline, registry)
    }

    fn admit(dir: &TempDir, db: &Database, name: &str) -> crate::db::Job {
        let path = dir.path().join(name);
        let table = Table::new(
            vec!["City".to_string()],
            vec![vec![Cell::Text("Ankara".to_string())]],
        );
        sheet::write_table(&table, &path).unwrap();
        let id = job_repo::admit(db, "a@example.com", name, &path.to_string_lossy(), "", None)
            .unwrap()
            .job_id;
        job_repo::find_by_id(db, &id).unwrap().unwrap()
    }

    #[test]
    fn test_submit_refused_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let (_db, pipeline, registry) = setup(&dir, Arc::new(CountingRelay::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::with_shutdown_flag(pipeline, 2, Arc::clone(&shutdown)).unwrap();

        shutdown.store(true, Ordering::Relaxed);
        assert!(matches!(
            pool.submit(WorkItem::new(
                crate::db::Job {
                    id: "x".into(),
                    sender: String::new(),
                    filename: String::new(),
                    subject: String::new(),
                    stored_path: String::new(),
                    status: JobStatus::Pending,
                    created_at: String::new(),
                    claimed_at: None,
                    processed_at: None,
                    error: None,
                    size_bytes: None,
                },
                registry
            )),
            Err(WorkerError::ShuttingDown)
        ));

        assert!(pool.wait().is_empty());
    }

    #[test]
    fn test_duplicate_submissions_processed_once() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(CountingRelay::default());
        let (db, pipeline, registry) = setup(&dir, relay.clone());
        let pool =
            WorkerPool::with_shutdown_flag(pipeline, 4, Arc::new(AtomicBool::new(false))).unwrap();

        let job = admit(&dir, &db, "a.xlsx");
        for _ in 0..4 {
            pool.submit(WorkItem::new(job.clone(), registry.clone())).unwrap();
        }

        let results = pool.wait();
        assert_eq!(results.len(), 4);
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.outcome, JobOutcome::Skipped { .. }))
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(skipped, 3);
        assert_eq!(relay.sent.load(Ordering::SeqCst), 1);
        assert_eq!(
            job_repo::find_by_id(&db, &job.id).unwrap().unwrap().status,
            JobStatus::Success
        );
    }
}
