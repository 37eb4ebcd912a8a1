pub mod config;
pub mod context;
pub mod events;
pub mod job;
pub mod runner;
pub mod stage;
pub mod supervisor;
pub mod views;

pub use config::PipelineConfig;
pub use context::JobContext;
pub use events::{JobEvent, JobEventKind, JobSubscriber, LedgerSettlement, ProgressProjection, Subscribers};
pub use job::{Job, JobKind};
pub use runner::PipelineRunner;
pub use stage::JobStage;
pub use supervisor::JobSupervisor;
pub use views::{
    CancelReceipt, DownloadedArchive, JobReceipt, JobStatusView, JobSummary, Principal,
    SubmitRequest,
};
