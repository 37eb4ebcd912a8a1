//! The job record: one pipeline run over one uploaded archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::JobStage;
use crate::error::ChapterflowError;

/// What a job produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Pages go through the translate transform and are packaged into a
    /// downloadable archive.
    Translate,
    /// Pages are uploaded unchanged and persisted as the chapter's pages.
    ChapterUpload {
        chapter_id: i64,
        title: String,
        chapter_number: u32,
    },
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Translate => "translate",
            JobKind::ChapterUpload { .. } => "chapter_upload",
        }
    }

    /// Stage the job enters once extraction succeeds.
    pub fn working_stage(&self) -> JobStage {
        match self {
            JobKind::Translate => JobStage::Translating,
            JobKind::ChapterUpload { .. } => JobStage::Uploading,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub owner_id: String,
    pub original_filename: String,
    pub stage: JobStage,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub error_text: Option<String>,
    /// Points this job costs; 0 for jobs that never touch the ledger.
    pub cost: i64,
    pub cost_charged: bool,
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, owner_id: &str, original_filename: &str, cost: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            owner_id: owner_id.to_string(),
            original_filename: original_filename.to_string(),
            stage: JobStage::Received,
            total_items: 0,
            completed_items: 0,
            failed_items: 0,
            error_text: None,
            cost,
            cost_charged: false,
            output_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn transition(&mut self, next: JobStage) -> Result<(), ChapterflowError> {
        if !self.stage.can_transition_to(next) {
            return Err(ChapterflowError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }

        self.stage = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Moves to `failed` with a human-readable cause. A no-op on a job
    /// that is already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.error_text = Some(reason.into());
        // Every non-terminal stage may move to failed.
        self.transition(JobStage::Failed).is_ok()
    }

    /// Fixes the page count. Only allowed while extracting, and only once.
    pub fn set_total(&mut self, total: u32) -> Result<(), ChapterflowError> {
        if self.stage != JobStage::Extracting || self.total_items != 0 {
            return Err(ChapterflowError::InvalidTransition {
                from: self.stage,
                to: self.kind.working_stage(),
            });
        }
        self.total_items = total;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Counts one finished page. Returns `false` (and changes nothing) if
    /// the count would exceed `total_items`.
    pub fn record_page(&mut self, succeeded: bool) -> bool {
        if self.completed_items + self.failed_items >= self.total_items {
            return false;
        }
        if succeeded {
            self.completed_items += 1;
        } else {
            self.failed_items += 1;
        }
        self.updated_at = Utc::now();
        true
    }

    pub fn percentage(&self) -> u8 {
        percentage(self.completed_items, self.total_items)
    }
}

/// `round(completed / total * 100)`, 0 when there is nothing to do.
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (f64::from(completed) / f64::from(total) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
