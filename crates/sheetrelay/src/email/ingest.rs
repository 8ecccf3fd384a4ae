//! Saves polled attachments and admits them as pending jobs.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::db::{job_repo, Database};
use crate::sanitize::{redact_address, redact_path};

use super::client::Mailbox;
use super::error::Result;
use super::poller::{MailboxPoller, RawAttachment};

/// Outcome of one ingest pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Messages from allowed senders with at least one spreadsheet.
    pub messages: usize,
    /// New pending jobs.
    pub admitted: usize,
    /// Attachments whose job already existed.
    pub duplicates: usize,
    /// Attachments that could not be saved or admitted.
    pub failed: usize,
    /// Messages flagged `\Seen` after all their attachments were admitted.
    pub marked_seen: usize,
}

/// Stores attachments under the inbox directory and records them in the job store.
pub struct Ingestor {
    db: Database,
    inbox_dir: PathBuf,
}

impl Ingestor {
    pub fn new(db: Database, inbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            inbox_dir: inbox_dir.into(),
        }
    }

    /// Polls the mailbox once and admits every accepted attachment.
    ///
    /// A message is marked seen only after all of its attachments were
    /// admitted or found to be duplicates; otherwise it stays unread and is
    /// picked up again on the next pass.
    pub async fn ingest(
        &self,
        poller: &MailboxPoller,
        mailbox: &mut dyn Mailbox,
    ) -> Result<IngestReport> {
        let messages = poller.poll(mailbox).await?;
        let mut report = IngestReport {
            messages: messages.len(),
            ..IngestReport::default()
        };

        for message in messages {
            let span = info_span!(
                "ingest_message",
                uid = message.uid,
                sender = %redact_address(&message.sender)
            );
            let mut complete = true;

            for attachment in &message.attachments {
                match self.admit(attachment).instrument(span.clone()).await {
                    Ok(true) => report.admitted += 1,
                    Ok(false) => report.duplicates += 1,
                    Err(e) => {
                        error!(parent: &span, file = %attachment.filename, error = %e, "Failed to admit attachment");
                        report.failed += 1;
                        complete = false;
                    }
                }
            }

            if !complete {
                continue;
            }
            match mailbox.mark_seen(message.uid).await {
                Ok(()) => report.marked_seen += 1,
                Err(e) => {
                    warn!(parent: &span, error = %e, "Could not mark message seen; duplicates will be dropped next pass");
                }
            }
        }

        info!(
            messages = report.messages,
            admitted = report.admitted,
            duplicates = report.duplicates,
            failed = report.failed,
            "Ingest pass complete"
        );
        Ok(report)
    }

    /// Returns whether a new job was created.
    async fn admit(&self, attachment: &RawAttachment) -> Result<bool> {
        let path = self.save(attachment).await?;
        let stored = path.to_string_lossy();

        let admission = match job_repo::admit(
            &self.db,
            &attachment.sender,
            &attachment.filename,
            &stored,
            &attachment.subject,
            Some(attachment.bytes.len() as u64),
        ) {
            Ok(admission) => admission,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e.into());
            }
        };

        if admission.is_new {
            info!(job_id = %admission.job_id, file = %redact_path(&path), "Admitted job");
        } else {
            remove_quietly(&path).await;
            info!(job_id = %admission.job_id, "Duplicate attachment ignored");
        }
        Ok(admission.is_new)
    }

    async fn save(&self, attachment: &RawAttachment) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.inbox_dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let unique_id = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}_{}", timestamp, &unique_id[..8], attachment.filename);
        let path = self.inbox_dir.join(filename);

        tokio::fs::write(&path, &attachment.bytes).await?;
        Ok(path)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(file = %redact_path(path), error = %e, "Could not remove stored attachment");
    }
}
