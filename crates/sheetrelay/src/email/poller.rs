//! Turns unread mail into attachment candidates from allowed senders.

use log::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::sanitize::redact_address;

use super::client::Mailbox;
use super::error::Result;
use super::parser::EmailParser;

/// One spreadsheet attachment and the message it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttachment {
    pub sender: String,
    pub subject: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// An unread message from an allowed sender.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledMessage {
    pub uid: u32,
    pub sender: String,
    pub subject: String,
    pub attachments: Vec<RawAttachment>,
}

/// Case-insensitive sender allow-list.
///
/// Entries: `*` allows everyone, `@domain` matches the address suffix, an
/// entry containing `@` must equal the address, anything else must occur
/// somewhere in the address. An empty list allows no one.
#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    entries: Vec<String>,
}

impl SenderFilter {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_allowed(&self, sender: &str) -> bool {
        let sender = sender.trim().to_lowercase();
        if sender.is_empty() {
            return false;
        }
        self.entries.iter().any(|entry| {
            if entry == "*" {
                true
            } else if entry.starts_with('@') {
                sender.ends_with(entry.as_str())
            } else if entry.contains('@') {
                sender == *entry
            } else {
                sender.contains(entry.as_str())
            }
        })
    }
}

/// Reads unseen mail and keeps what the filters accept.
pub struct MailboxPoller {
    parser: EmailParser,
    senders: SenderFilter,
}

impl MailboxPoller {
    pub fn new(parser: EmailParser, senders: SenderFilter) -> Self {
        Self { parser, senders }
    }

    pub fn from_config(config: &MailboxConfig) -> Self {
        Self::new(
            EmailParser::new(&config.attachment_extensions, config.max_attachment_size),
            SenderFilter::new(&config.allowed_senders),
        )
    }

    /// Lists unread messages from allowed senders. Nothing is marked seen here;
    /// messages from other senders or without usable attachments are left as
    /// they are.
    pub async fn poll(&self, mailbox: &mut dyn Mailbox) -> Result<Vec<PolledMessage>> {
        let raw_messages = mailbox.fetch_unseen().await?;
        let mut polled = Vec::new();

        for (uid, raw) in raw_messages {
            let parsed = match self.parser.parse(&raw, uid) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping UID {}: {}", uid, e);
                    continue;
                }
            };

            if !self.senders.is_allowed(&parsed.sender) {
                debug!(
                    "Ignoring UID {} from {}",
                    uid,
                    redact_address(&parsed.sender)
                );
                continue;
            }
            if parsed.attachments.is_empty() {
                debug!("UID {} has no spreadsheet attachments", uid);
                continue;
            }

            let attachments = parsed
                .attachments
                .into_iter()
                .map(|a| RawAttachment {
                    sender: parsed.sender.clone(),
                    subject: parsed.subject.clone(),
                    filename: a.filename,
                    bytes: a.content,
                })
                .collect();
            polled.push(PolledMessage {
                uid,
                sender: parsed.sender,
                subject: parsed.subject,
                attachments,
            });
        }

        info!("Poll found {} message(s) with spreadsheets", polled.len());
        Ok(polled)
    }
}
