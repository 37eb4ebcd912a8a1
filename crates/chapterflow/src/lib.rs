pub mod archive;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod transform;
pub mod worker;

pub use archive::{ArchiveExtractor, ArchiveSummary, PackagedArchive};
pub use broadcast::{JobEventBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use db::Database;
pub use error::{
    ChapterflowError, ConfigError, ExtractionError, PackagingError, Result, StorageError,
    ValidationError, WorkerError,
};
pub use ledger::LedgerReconciler;
pub use pipeline::{
    CancelReceipt, DownloadedArchive, Job, JobKind, JobReceipt, JobStage, JobStatusView,
    JobSummary, PipelineConfig, PipelineRunner, Principal, SubmitRequest,
};
pub use progress::{ProgressSnapshot, ProgressStore};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use transform::{PageTransform, TransformError, TransformProvider};
pub use worker::{CancelFlag, FanOutPool, OutputReference, PageStatus, PageTask};
