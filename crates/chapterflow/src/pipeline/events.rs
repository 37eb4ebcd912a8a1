//! Job events and the subscribers that react to them.
//!
//! The runner publishes an event after every persisted change to a job.
//! Side effects that used to be threaded through callbacks (progress
//! projection, ledger settlement, the in-process event stream) are
//! subscribers here; the worker pool knows nothing about them.

use std::sync::Arc;

use tracing::error;

use crate::error::Result;
use crate::ledger::LedgerReconciler;
use crate::progress::{ProgressSnapshot, ProgressStore};

use super::job::Job;
use super::stage::JobStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
    StageChanged,
    PageFinished {
        page_number: u32,
        succeeded: bool,
        error: Option<String>,
    },
    /// The job reached a terminal stage. Sent exactly once per job.
    Finished,
}

/// A change to a job, carrying the job as persisted after the change.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
}

impl JobEvent {
    pub fn stage_changed(job: &Job) -> Self {
        Self {
            kind: JobEventKind::StageChanged,
            job: job.clone(),
        }
    }

    pub fn page_finished(job: &Job, page_number: u32, succeeded: bool, error: Option<String>) -> Self {
        Self {
            kind: JobEventKind::PageFinished {
                page_number,
                succeeded,
                error,
            },
            job: job.clone(),
        }
    }

    pub fn finished(job: &Job) -> Self {
        Self {
            kind: JobEventKind::Finished,
            job: job.clone(),
        }
    }
}

pub trait JobSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_event(&self, event: &JobEvent) -> Result<()>;
}

/// Fan-out to every registered subscriber. One failing subscriber does not
/// stop the others.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Vec<Arc<dyn JobSubscriber>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subscriber: Arc<dyn JobSubscriber>) -> Self {
        self.inner.push(subscriber);
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn publish(&self, event: &JobEvent) {
        for subscriber in &self.inner {
            if let Err(e) = subscriber.on_event(event) {
                error!(
                    job_id = %event.job.id,
                    subscriber = subscriber.name(),
                    "Subscriber failed: {}",
                    e
                );
            }
        }
    }
}

/// Keeps the progress store in step with the job.
pub struct ProgressProjection {
    store: ProgressStore,
}

impl ProgressProjection {
    pub fn new(store: ProgressStore) -> Self {
        Self { store }
    }
}

impl JobSubscriber for ProgressProjection {
    fn name(&self) -> &'static str {
        "progress"
    }

    fn on_event(&self, event: &JobEvent) -> Result<()> {
        self.store.put(ProgressSnapshot::from(&event.job));
        Ok(())
    }
}

/// Refunds a charged job that ended `failed`.
///
/// Cancelled jobs keep their charge; completed jobs obviously do too. The
/// refund itself is idempotent, so a replayed `Finished` event is harmless.
pub struct LedgerSettlement {
    ledger: LedgerReconciler,
}

impl LedgerSettlement {
    pub fn new(ledger: LedgerReconciler) -> Self {
        Self { ledger }
    }
}

impl JobSubscriber for LedgerSettlement {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn on_event(&self, event: &JobEvent) -> Result<()> {
        if event.kind != JobEventKind::Finished || event.job.stage != JobStage::Failed {
            return Ok(());
        }
        let _span = tracing::info_span!("settle", job_id = %event.job.id).entered();
        self.ledger.refund(&event.job)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repo::{self, NewUser};
    use crate::db::{job_repo, Database};
    use crate::error::ChapterflowError;
    use crate::pipeline::job::JobKind;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder(Mutex<Vec<JobEventKind>>);

    impl JobSubscriber for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn on_event(&self, event: &JobEvent) -> Result<()> {
            self.0.lock().unwrap().push(event.kind.clone());
            Ok(())
        }
    }

    struct Failing;

    impl JobSubscriber for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn on_event(&self, _event: &JobEvent) -> Result<()> {
            Err(ChapterflowError::ShuttingDown)
        }
    }

    fn charged_job(db: &Database, ledger: &LedgerReconciler) -> Job {
        user_repo::create(
            db,
            &NewUser {
                id: Some("u1".to_string()),
                username: "reader".to_string(),
                points: Some(100),
                is_privileged: false,
            },
        )
        .unwrap();
        let mut job = Job::new(JobKind::Translate, "u1", "vol1.cbz", 20);
        job_repo::insert(db, &job).unwrap();
        assert!(ledger.charge(&job).unwrap());
        job.cost_charged = true;
        job
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let subscribers = Subscribers::new()
            .with(Arc::new(Failing))
            .with(recorder.clone());

        let job = Job::new(JobKind::Translate, "u1", "vol1.cbz", 20);
        subscribers.publish(&JobEvent::stage_changed(&job));

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![JobEventKind::StageChanged]
        );
    }

    #[test]
    fn test_progress_projection_writes_snapshot() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let projection = ProgressProjection::new(store.clone());

        let job = Job::new(JobKind::Translate, "u1", "vol1.cbz", 20);
        projection.on_event(&JobEvent::stage_changed(&job)).unwrap();

        assert_eq!(store.get(&job.id).unwrap().stage, JobStage::Received);
    }

    #[test]
    fn test_settlement_refunds_failed_job_once() {
        let db = Database::open_in_memory().unwrap();
        let ledger = LedgerReconciler::new(db.clone());
        let mut job = charged_job(&db, &ledger);
        job.fail("all pages failed");

        let settlement = LedgerSettlement::new(ledger.clone());
        settlement.on_event(&JobEvent::finished(&job)).unwrap();
        settlement.on_event(&JobEvent::finished(&job)).unwrap();

        assert_eq!(ledger.job_total(&job.id).unwrap(), 0);
        assert_eq!(ledger.balance("u1").unwrap(), 100);
    }

    #[test]
    fn test_settlement_keeps_charge_for_cancelled_job() {
        let db = Database::open_in_memory().unwrap();
        let ledger = LedgerReconciler::new(db.clone());
        let mut job = charged_job(&db, &ledger);
        job.transition(JobStage::Cancelled).unwrap();

        LedgerSettlement::new(ledger.clone())
            .on_event(&JobEvent::finished(&job))
            .unwrap();

        assert_eq!(ledger.job_total(&job.id).unwrap(), -20);
    }

    #[test]
    fn test_settlement_ignores_non_terminal_events() {
        let db = Database::open_in_memory().unwrap();
        let ledger = LedgerReconciler::new(db.clone());
        let mut job = charged_job(&db, &ledger);
        job.fail("boom");

        LedgerSettlement::new(ledger.clone())
            .on_event(&JobEvent::stage_changed(&job))
            .unwrap();

        assert_eq!(ledger.job_total(&job.id).unwrap(), -20);
    }
}
