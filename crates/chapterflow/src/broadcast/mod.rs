//! Broadcasting for real-time job event streaming.

pub mod job_progress;

pub use job_progress::{JobEventBroadcaster, JobProgressEvent};
