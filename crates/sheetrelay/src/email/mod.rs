//! Mailbox intake: IMAP polling, attachment extraction and job admission.

pub mod client;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod poller;

pub use client::{ImapClient, Mailbox};
pub use error::EmailError;
pub use ingest::{IngestReport, Ingestor};
pub use parser::{EmailParser, ExtractedAttachment, ParsedMessage};
pub use poller::{MailboxPoller, PolledMessage, RawAttachment, SenderFilter};
