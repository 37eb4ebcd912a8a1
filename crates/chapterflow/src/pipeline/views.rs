//! Inputs and outputs of the runner's public operations.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::user_repo::UserRow;
use crate::progress::ProgressSnapshot;

use super::job::{percentage, Job, JobKind};
use super::stage::JobStage;

pub const CBZ_CONTENT_TYPE: &str = "application/x-cbz";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub is_privileged: bool,
}

impl Principal {
    /// Owner or privileged.
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_privileged || self.id == owner_id
    }
}

impl From<&UserRow> for Principal {
    fn from(user: &UserRow) -> Self {
        Self {
            id: user.id.clone(),
            is_privileged: user.is_privileged,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReceipt {
    pub job_id: String,
    pub total: u32,
}

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub kind: String,
    pub stage: JobStage,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub percentage: u8,
    pub error: Option<String>,
    pub download_ready: bool,
}

impl From<ProgressSnapshot> for JobStatusView {
    fn from(snapshot: ProgressSnapshot) -> Self {
        let download_ready =
            snapshot.stage == JobStage::Completed && snapshot.kind == JobKind::Translate.as_str();
        Self {
            percentage: percentage(snapshot.completed_items, snapshot.total_items),
            job_id: snapshot.job_id,
            kind: snapshot.kind,
            stage: snapshot.stage,
            total: snapshot.total_items,
            completed: snapshot.completed_items,
            failed: snapshot.failed_items,
            error: snapshot.error_text,
            download_ready,
        }
    }
}

/// One entry of a job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub status: JobStatusView,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            status: JobStatusView::from(ProgressSnapshot::from(job)),
            original_filename: job.original_filename.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelReceipt {
    pub job_id: String,
    /// Whether the cancel flag was raised. The job may still finish
    /// normally if every page had already been dispatched.
    pub cancelled: bool,
    pub stage: JobStage,
}

#[derive(Debug, Clone)]
pub struct DownloadedArchive {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// `translated_{stem}.cbz`, safe to drop into a quoted header value.
pub fn download_filename(original_filename: &str) -> String {
    let stem = Path::new(original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("chapter");

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c == '"' || c == '\\' || c == '/' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("translated_{}.cbz", cleaned)
}
