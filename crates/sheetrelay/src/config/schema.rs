use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationMode;
use crate::registry::DEFAULT_KNOWN_REGIONS;
use crate::secrets::{expand_home, SecretSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_data_directory")]
    pub data_directory: String,
    /// Defaults to `<data_directory>/data/sheetrelay.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    pub groups_file: String,
    /// Region names used for column discovery. Defaults to the Turkish provinces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_regions: Option<Vec<String>>,
    pub mailbox: MailboxConfig,
    pub relay: RelayConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.data_directory))
    }

    /// Where ingested attachments are stored.
    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir().join("inbox")
    }

    /// Where aggregated spreadsheets are written.
    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir().join("outbox")
    }

    pub fn database_file(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(expand_home(path)),
            None => self.data_dir().join("data").join("sheetrelay.db"),
        }
    }

    pub fn groups_path(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.groups_file))
    }

    pub fn known_region_list(&self) -> Vec<String> {
        match &self.known_regions {
            Some(regions) => regions.clone(),
            None => DEFAULT_KNOWN_REGIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

fn default_data_directory() -> String {
    "~/.sheetrelay".to_string()
}

/// IMAP mailbox that receives the source spreadsheets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(flatten)]
    pub auth: SecretSource,
    #[serde(default = "default_inbox")]
    pub folder: String,
    /// `*`, `@domain`, an exact address, or a fragment matched anywhere in the
    /// sender address.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default = "default_extensions")]
    pub attachment_extensions: Vec<String>,
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_imap_port() -> u16 {
    993
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["xlsx".to_string(), "xls".to_string()]
}

fn default_max_attachment_size() -> u64 {
    10 * 1024 * 1024
}

fn default_poll_interval() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTls {
    /// Plain connection upgraded with STARTTLS (usually port 587).
    #[default]
    Starttls,
    /// TLS from the first byte (usually port 465).
    Implicit,
}

/// Outbound SMTP relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: RelayTls,
    pub username: String,
    #[serde(flatten)]
    pub auth: SecretSource,
    pub from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,
    /// Placeholders: `{group_id}`, `{group_name}`, `{sender}`, `{filename}`.
    #[serde(default = "default_subject_template")]
    pub subject_template: String,
    #[serde(default = "default_body_template")]
    pub body_template: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    4
}

fn default_max_delay() -> u64 {
    10
}

fn default_subject_template() -> String {
    "{group_id} spreadsheet".to_string()
}

fn default_body_template() -> String {
    "Hello {group_name},\n\nAttached are the rows routed to your group from {filename}, \
     received from {sender}.\n"
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Overall budget for one job, dispatch retries included.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    /// A `processing` job claimed longer ago than this is reset to `pending`.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Maximum pending jobs picked up per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub aggregation: AggregationMode,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_job_timeout() -> u64 {
    300
}

fn default_stale_after() -> u64 {
    900
}

fn default_batch_size() -> usize {
    100
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            job_timeout_secs: default_job_timeout(),
            stale_after_secs: default_stale_after(),
            batch_size: default_batch_size(),
            aggregation: AggregationMode::default(),
        }
    }
}
