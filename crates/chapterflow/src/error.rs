use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::stage::JobStage;

#[derive(Error, Debug)]
pub enum ChapterflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid upload: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Packaging failed: {0}")]
    Packaging(#[from] PackagingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Insufficient balance: {required} points required, {current} available")]
    InsufficientBalance { required: i64, current: i64 },

    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Job {job_id} has no output yet (stage: {stage})")]
    NotReady { job_id: String, stage: JobStage },

    #[error("Job {job_id} is still running (stage: {stage})")]
    StillRunning { job_id: String, stage: JobStage },

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: JobStage, to: JobStage },

    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Transform '{kind}' is not usable: {reason}")]
    Transform { kind: String, reason: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

/// Upload rejections. Raised before any job record or ledger entry exists.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Unsupported archive type '{filename}' (expected .zip or .cbz)")]
    UnsupportedExtension { filename: String },

    #[error("Uploaded archive is empty")]
    EmptyUpload,

    #[error("Archive is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Archive is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Not a valid archive: {0}")]
    CorruptArchive(String),

    #[error("Archive contains no recognised images")]
    NoImages,

    #[error("Archive expands to more than {limit} bytes")]
    ExpandedTooLarge { limit: u64 },

    #[error("Failed to read entry '{name}': {reason}")]
    ReadEntry { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("No succeeded pages to package")]
    NothingToPackage,

    #[error("Page {page_number} has no local output to package")]
    NotLocal { page_number: u32 },

    #[error("Page {page_number} was not uploaded to the hosting endpoint")]
    NotHosted { page_number: u32 },

    #[error("Archive discarded, the job was abandoned while packaging")]
    Abandoned,

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Concurrency ceiling must be at least 1")]
    ZeroCapacity,

    #[error("Worker pool failed: {0}")]
    PoolFatal(String),

    #[error("Background task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, ChapterflowError>;
