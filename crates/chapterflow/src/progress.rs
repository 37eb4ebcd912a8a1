//! Short-lived progress snapshots for polling clients.
//!
//! Snapshots expire `ttl` after their last write. The job record stays the
//! source of truth; a missing snapshot only means the caller has to fall
//! back to the database.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;

use crate::pipeline::job::Job;
use crate::pipeline::stage::JobStage;

const MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub owner_id: String,
    pub kind: String,
    pub stage: JobStage,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub error_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for ProgressSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            kind: job.kind.as_str().to_string(),
            stage: job.stage,
            total_items: job.total_items,
            completed_items: job.completed_items,
            failed_items: job.failed_items,
            error_text: job.error_text.clone(),
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct ProgressStore {
    cache: Cache<String, ProgressSnapshot>,
}

impl ProgressStore {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Writes a snapshot, resetting its expiry.
    pub fn put(&self, snapshot: ProgressSnapshot) {
        self.cache.insert(snapshot.job_id.clone(), snapshot);
    }

    /// Stores `snapshot` unless the job already has one, and returns
    /// whichever snapshot ends up cached.
    pub fn insert_if_absent(&self, snapshot: ProgressSnapshot) -> ProgressSnapshot {
        self.cache
            .entry(snapshot.job_id.clone())
            .or_insert(snapshot)
            .into_value()
    }

    pub fn get(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.cache.get(job_id)
    }

    pub fn remove(&self, job_id: &str) {
        self.cache.invalidate(job_id);
    }
}
