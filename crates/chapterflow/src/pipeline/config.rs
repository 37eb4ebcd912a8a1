use std::path::PathBuf;
use std::time::Duration;

use crate::archive::extract::DEFAULT_EXPANSION_FACTOR;
use crate::config::Config;

/// The slice of [`Config`] the runner needs, in runtime types.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_directory: PathBuf,
    pub worker_count: usize,
    pub max_archive_bytes: u64,
    pub max_extracted_bytes: u64,
    pub progress_ttl: Duration,
    pub job_timeout: Option<Duration>,
    pub translation_cost: i64,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_directory: PathBuf::from(&config.data_directory),
            worker_count: config.worker_count,
            max_archive_bytes: config.max_archive_bytes,
            max_extracted_bytes: config.max_extracted_bytes.unwrap_or_else(|| {
                config
                    .max_archive_bytes
                    .saturating_mul(DEFAULT_EXPANSION_FACTOR)
            }),
            progress_ttl: Duration::from_secs(config.progress_ttl_secs),
            job_timeout: config.job_timeout_secs.map(Duration::from_secs),
            translation_cost: config.translation.cost,
        }
    }
}
