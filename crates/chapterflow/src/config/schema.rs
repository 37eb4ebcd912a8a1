use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_data_directory")]
    pub data_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    /// Concurrency ceiling for page work inside one job.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    /// Budget for the decompressed pages of one upload. Defaults to four
    /// times `max_archive_bytes`.
    #[serde(default)]
    pub max_extracted_bytes: Option<u64>,
    #[serde(default = "default_progress_ttl_secs")]
    pub progress_ttl_secs: u64,
    /// Job-level deadline. Unset means jobs are bounded only by per-call timeouts.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_directory() -> String {
    dirs::home_dir()
        .map(|h| h.join(".chapterflow"))
        .unwrap_or_else(|| PathBuf::from(".chapterflow"))
        .to_string_lossy()
        .into_owned()
}

fn default_worker_count() -> usize {
    5
}

fn default_max_archive_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_progress_ttl_secs() -> u64 {
    3600
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_directory).join("chapterflow.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_cost")]
    pub cost: i64,
    #[serde(default)]
    pub transform: TransformConfig,
}

fn default_translation_cost() -> i64 {
    20
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            cost: default_translation_cost(),
            transform: TransformConfig::default(),
        }
    }
}

/// Which page transform translate jobs run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Copies every page unchanged.
    #[default]
    Identity,
    Remote(RemoteModelConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteModelConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Fields sent with every request; the page is added as `image`.
    #[serde(default)]
    pub request_template: serde_json::Map<String, serde_json::Value>,
    /// Dot path to the base64 result in the response body.
    #[serde(default = "default_response_path")]
    pub response_path: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_response_path() -> String {
    "translated_image".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    #[serde(default = "default_hosting_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_hosting_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_hosting_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_hosting_endpoint() -> String {
    "https://api.imgbb.com/1/upload".to_string()
}

fn default_hosting_key_env() -> Option<String> {
    Some("IMGBB_API_KEY".to_string())
}

fn default_hosting_timeout_secs() -> u64 {
    300
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_hosting_endpoint(),
            api_key: None,
            api_key_file: None,
            api_key_env: default_hosting_key_env(),
            timeout_secs: default_hosting_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long in-flight jobs get to wind down after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
