//! In-process stream of job events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::pipeline::events::{JobEvent, JobEventKind, JobSubscriber};
use crate::pipeline::stage::JobStage;

/// Flattened job event for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub filename: String,
    pub kind: String,
    pub stage: JobStage,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub percentage: u8,
    /// Set for page events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&JobEvent> for JobProgressEvent {
    fn from(event: &JobEvent) -> Self {
        let job = &event.job;
        let (page_number, error) = match &event.kind {
            JobEventKind::PageFinished {
                page_number, error, ..
            } => (Some(*page_number), error.clone()),
            _ => (None, job.error_text.clone()),
        };

        Self {
            job_id: job.id.clone(),
            filename: job.original_filename.clone(),
            kind: job.kind.as_str().to_string(),
            stage: job.stage,
            total: job.total_items,
            completed: job.completed_items,
            failed: job.failed_items,
            percentage: job.percentage(),
            page_number,
            error,
            finished: event.kind == JobEventKind::Finished,
            timestamp: job.updated_at,
        }
    }
}

/// Broadcasts job events to any number of in-process receivers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl JobSubscriber for JobEventBroadcaster {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn on_event(&self, event: &JobEvent) -> Result<()> {
        self.send(JobProgressEvent::from(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::{Job, JobKind};

    fn working_job() -> Job {
        let mut job = Job::new(JobKind::Translate, "u1", "vol1.cbz", 20);
        job.transition(JobStage::Extracting).unwrap();
        job.set_total(4).unwrap();
        job.transition(JobStage::Translating).unwrap();
        job
    }

    #[test]
    fn test_send_without_receivers() {
        let broadcaster = JobEventBroadcaster::new(4);
        broadcaster.send(JobProgressEvent::from(&JobEvent::stage_changed(&working_job())));
    }

    #[test]
    fn test_page_event_is_flattened() {
        let broadcaster = JobEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let mut job = working_job();
        job.record_page(false);
        broadcaster
            .on_event(&JobEvent::page_finished(&job, 2, false, Some("HTTP 500".to_string())))
            .unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, job.id);
        assert_eq!(received.stage, JobStage::Translating);
        assert_eq!(received.page_number, Some(2));
        assert_eq!(received.failed, 1);
        assert_eq!(received.error.as_deref(), Some("HTTP 500"));
        assert!(!received.finished);
    }

    #[test]
    fn test_finished_event() {
        let broadcaster = JobEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let mut job = working_job();
        job.fail("all pages failed");
        broadcaster.on_event(&JobEvent::finished(&job)).unwrap();

        let received = rx.try_recv().unwrap();
        assert!(received.finished);
        assert_eq!(received.stage, JobStage::Failed);
        assert_eq!(received.error.as_deref(), Some("all pages failed"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let job = working_job();
        let event = JobProgressEvent::from(&JobEvent::stage_changed(&job));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], job.id);
        assert_eq!(json["stage"], "translating");
        assert!(json.get("pageNumber").is_none());
    }
}
