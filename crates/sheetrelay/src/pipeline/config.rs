use std::path::PathBuf;
use std::time::Duration;

use crate::aggregate::AggregationMode;
use crate::config::Config;

pub struct PipelineConfig {
    pub output_directory: PathBuf,
    pub aggregation: AggregationMode,
    pub job_timeout: Duration,
    pub subject_template: String,
    pub body_template: String,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_directory: config.outbox_dir(),
            aggregation: config.pipeline.aggregation,
            job_timeout: Duration::from_secs(config.pipeline.job_timeout_secs),
            subject_template: config.relay.subject_template.clone(),
            body_template: config.relay.body_template.clone(),
        }
    }
}
