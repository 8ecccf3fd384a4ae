pub mod aggregate;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod sanitize;
pub mod secrets;
pub mod sheet;
pub mod telemetry;
pub mod worker;

pub use aggregate::{AggregationMode, Aggregator};
pub use config::{load_config, Config};
pub use db::{Database, Job, JobStatus, StatusCounts};
pub use dispatch::{DispatchError, Dispatcher, MailRelay, RetryPolicy};
pub use email::{EmailError, Ingestor, Mailbox, MailboxPoller};
pub use error::{ConfigError, Result, SheetRelayError, WorkerError};
pub use orchestrator::{CycleReport, Orchestrator};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext};
pub use registry::{DestinationGroup, GroupRegistry, RegistryHandle};
pub use secrets::{resolve_secret, SecretError};
