pub mod config;
pub mod context;
pub mod error;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{GroupOutcome, PipelineError};
pub use runner::Pipeline;
