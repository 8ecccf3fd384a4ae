pub mod job;
pub mod pool;

pub use job::{JobOutcome, JobResult, WorkItem};
pub use pool::WorkerPool;

// Re-export crossbeam_channel for use in the orchestrator
pub use crossbeam_channel;
