//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct owns a temporary data directory, an in-memory job
//! store and a recording relay, and wires them into a real `Orchestrator`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::Message;
use tempfile::TempDir;

use sheetrelay::aggregate::AggregationMode;
use sheetrelay::db::{job_repo, Database, Job};
use sheetrelay::dispatch::{Dispatcher, MailRelay, RelayError, RetryPolicy};
use sheetrelay::email::error::Result as EmailResult;
use sheetrelay::email::{EmailParser, Ingestor, Mailbox, MailboxPoller, SenderFilter};
use sheetrelay::orchestrator::{Orchestrator, OrchestratorSettings};
use sheetrelay::pipeline::{Pipeline, PipelineConfig};
use sheetrelay::registry::{GroupRegistry, RegistryHandle};

use super::builders::{two_group_registry, write_sheet};

/// Relay that records recipients and can be told to fail for some of them.
#[derive(Default)]
pub struct RecordingRelay {
    rejected: Mutex<HashSet<String>>,
    transient: Mutex<HashMap<String, u32>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingRelay {
    /// Permanently rejects every message to `address`.
    pub fn reject(&self, address: &str) {
        self.rejected.lock().unwrap().insert(address.to_string());
    }

    /// Fails the next `times` sends to `address` with a transient error.
    pub fn fail_transiently(&self, address: &str, times: u32) {
        self.transient
            .lock()
            .unwrap()
            .insert(address.to_string(), times);
    }

    pub fn clear(&self) {
        self.rejected.lock().unwrap().clear();
        self.transient.lock().unwrap().clear();
    }

    /// Recipients of accepted messages, in send order.
    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }

    /// Subjects of accepted messages, in send order.
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, subject)| subject.clone())
            .collect()
    }
}

impl MailRelay for RecordingRelay {
    fn send(&self, message: &Message) -> Result<(), RelayError> {
        let to = message
            .envelope()
            .to()
            .first()
            .map(|a| a.to_string())
            .unwrap_or_default();

        if self.rejected.lock().unwrap().contains(&to) {
            return Err(RelayError::Permanent(format!("550 5.1.1 {} rejected", to)));
        }
        if let Some(left) = self.transient.lock().unwrap().get_mut(&to) {
            if *left > 0 {
                *left -= 1;
                return Err(RelayError::Transient("421 4.4.2 connection dropped".into()));
            }
        }

        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        let subject = raw
            .lines()
            .find_map(|l| l.strip_prefix("Subject: "))
            .unwrap_or_default()
            .to_string();
        self.sent.lock().unwrap().push((to, subject));
        Ok(())
    }
}

/// In-memory mailbox holding raw messages by UID.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Vec<(u32, Vec<u8>)>,
    pub seen: HashSet<u32>,
    pub fail_fetch: bool,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&mut self, uid: u32, raw: Vec<u8>) {
        self.messages.push((uid, raw));
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_unseen(&mut self) -> EmailResult<Vec<(u32, Vec<u8>)>> {
        if self.fail_fetch {
            return Err(sheetrelay::EmailError::Timeout("fetch exceeded 1s".into()));
        }
        Ok(self
            .messages
            .iter()
            .filter(|(uid, _)| !self.seen.contains(uid))
            .cloned()
            .collect())
    }

    async fn mark_seen(&mut self, uid: u32) -> EmailResult<()> {
        self.seen.insert(uid);
        Ok(())
    }

    async fn disconnect(&mut self) -> EmailResult<()> {
        Ok(())
    }
}

/// Isolated environment with a real orchestrator over fakes.
pub struct TestHarness {
    temp_dir: TempDir,
    pub inbox_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub db: Database,
    pub relay: Arc<RecordingRelay>,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    /// Two-group registry, whole-file aggregation, any sender allowed.
    pub fn new() -> Self {
        Self::with(two_group_registry(), AggregationMode::WholeFile, &["*"])
    }

    pub fn with(registry: GroupRegistry, mode: AggregationMode, allowed: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let inbox_dir = temp_dir.path().join("inbox");
        let outbox_dir = temp_dir.path().join("outbox");
        std::fs::create_dir_all(&inbox_dir).expect("Failed to create inbox dir");

        let db = Database::open_in_memory().expect("Failed to open job store");
        let relay = Arc::new(RecordingRelay::default());
        let dispatcher = Dispatcher::new(
            relay.clone(),
            "relay@example.com",
            Some("Sheet Relay"),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            10 * 1024 * 1024,
        )
        .expect("Failed to build dispatcher");

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig {
                output_directory: outbox_dir.clone(),
                aggregation: mode,
                job_timeout: Duration::from_secs(60),
                subject_template: "{group_id} spreadsheet".to_string(),
                body_template: "Hello {group_name}, rows from {filename}.".to_string(),
            }),
            db.clone(),
            dispatcher,
        ));

        let poller = MailboxPoller::new(
            EmailParser::new(&["xlsx".to_string(), "xls".to_string()], 10 * 1024 * 1024),
            SenderFilter::new(allowed),
        );

        let orchestrator = Orchestrator::new(
            db.clone(),
            RegistryHandle::new(registry),
            pipeline,
            poller,
            Ingestor::new(db.clone(), &inbox_dir),
            OrchestratorSettings {
                worker_count: 2,
                batch_size: 100,
                stale_after: chrono::Duration::minutes(15),
                poll_interval: Duration::from_secs(300),
            },
        );

        Self {
            temp_dir,
            inbox_dir,
            outbox_dir,
            db,
            relay,
            orchestrator,
        }
    }

    /// Watches `path` for group changes between processing cycles.
    pub fn watching_groups_file(mut self, path: &Path) -> Self {
        let known = sheetrelay::registry::DEFAULT_KNOWN_REGIONS
            .iter()
            .map(|r| r.to_string())
            .collect();
        self.orchestrator = self.orchestrator.with_registry_file(path.to_path_buf(), known);
        self
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a spreadsheet into the inbox and admits it as a pending job.
    pub fn admit_sheet(&self, sender: &str, filename: &str, headers: &[&str], rows: &[&[&str]]) -> String {
        let path = self.inbox_dir.join(filename);
        write_sheet(&path, headers, rows);
        job_repo::admit(&self.db, sender, filename, &path.to_string_lossy(), "test", None)
            .expect("Failed to admit job")
            .job_id
    }

    pub fn job(&self, id: &str) -> Job {
        job_repo::find_by_id(&self.db, id)
            .expect("Failed to query job")
            .expect("job exists")
    }

    /// Files written to the outbox.
    pub fn outputs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.outbox_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
