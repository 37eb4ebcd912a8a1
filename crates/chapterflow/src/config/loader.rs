use std::path::Path;

use crate::config::schema::{Config, TransformConfig};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.max_archive_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "max_archive_bytes must be greater than 0".to_string(),
        });
    }

    if config.max_extracted_bytes == Some(0) {
        return Err(ConfigError::Validation {
            message: "max_extracted_bytes must be greater than 0 when set".to_string(),
        });
    }

    if config.progress_ttl_secs == 0 {
        return Err(ConfigError::Validation {
            message: "progress_ttl_secs must be greater than 0".to_string(),
        });
    }

    if config.job_timeout_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "job_timeout_secs must be greater than 0 when set".to_string(),
        });
    }

    if config.translation.cost < 0 {
        return Err(ConfigError::Validation {
            message: "translation.cost cannot be negative".to_string(),
        });
    }

    if let TransformConfig::Remote(remote) = &config.translation.transform {
        validate_endpoint("translation.transform.endpoint", &remote.endpoint)?;

        if remote.response_path.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "translation.transform.response_path cannot be empty".to_string(),
            });
        }

        if remote.timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "translation.transform.timeout_secs must be greater than 0".to_string(),
            });
        }
    }

    validate_endpoint("hosting.endpoint", &config.hosting.endpoint)?;

    Ok(())
}

fn validate_endpoint(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: format!("{} must be an http(s) URL, got '{}'", field, url),
        })
    }
}
