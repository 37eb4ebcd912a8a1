//! Job stages and the transitions allowed between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stage of a job.
///
/// ```text
/// received -> extracting -> translating | uploading -> packaging -> completed
/// ```
///
/// `failed` is reachable from every non-terminal stage. `cancelled` is
/// reachable from every stage before `packaging`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Received,
    Extracting,
    Translating,
    Uploading,
    Packaging,
    Completed,
    Failed,
    Cancelled,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Received => "received",
            JobStage::Extracting => "extracting",
            JobStage::Translating => "translating",
            JobStage::Uploading => "uploading",
            JobStage::Packaging => "packaging",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
            JobStage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Completed | JobStage::Failed | JobStage::Cancelled
        )
    }

    /// Whether a cancellation request can still change the outcome.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobStage::Received | JobStage::Extracting | JobStage::Translating | JobStage::Uploading
        )
    }

    pub fn can_transition_to(&self, next: JobStage) -> bool {
        use JobStage::*;

        match (self, next) {
            (Received, Extracting) => true,
            (Extracting, Translating | Uploading) => true,
            (Translating | Uploading, Packaging) => true,
            (Packaging, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(JobStage::Received),
            "extracting" => Ok(JobStage::Extracting),
            "translating" => Ok(JobStage::Translating),
            "uploading" => Ok(JobStage::Uploading),
            "packaging" => Ok(JobStage::Packaging),
            "completed" => Ok(JobStage::Completed),
            "failed" => Ok(JobStage::Failed),
            "cancelled" => Ok(JobStage::Cancelled),
            other => Err(format!("unknown job stage '{}'", other)),
        }
    }
}
