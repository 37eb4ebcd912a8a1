use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::warn;

use crate::worker::CancelFlag;

use super::job::Job;

/// Live state of one running job.
///
/// The job record is the only state touched from more than one task (the
/// job's own task, status reads, cancel requests), and every access goes
/// through the one lock here.
pub struct JobContext {
    job_id: String,
    job: Mutex<Job>,
    cancel: CancelFlag,
    abandoned: CancelFlag,
    settled: watch::Sender<bool>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            job_id: job.id.clone(),
            job: Mutex::new(job),
            cancel: CancelFlag::new(),
            abandoned: CancelFlag::new(),
            settled,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(|poisoned| {
            warn!(job_id = %self.job_id, "Job lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn snapshot(&self) -> Job {
        self.lock().clone()
    }

    /// Applies `f` under the lock and returns its result together with the
    /// job as it stands afterwards.
    pub fn update<T>(&self, f: impl FnOnce(&mut Job) -> T) -> (T, Job) {
        let mut job = self.lock();
        let value = f(&mut job);
        (value, job.clone())
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Raises the cancel flag. Returns `false` if the job is already past
    /// the point where cancelling changes anything.
    pub fn request_cancel(&self) -> bool {
        let stage = self.lock().stage;
        if !stage.is_cancellable() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Marks the job as given up on by its own task, e.g. past its
    /// deadline. Blocking work still running for it must discard its result.
    pub fn abandon(&self) {
        self.abandoned.cancel();
    }

    pub fn abandoned_flag(&self) -> CancelFlag {
        self.abandoned.clone()
    }

    /// Called once the terminal state is persisted and published.
    pub fn mark_settled(&self) {
        self.settled.send_replace(true);
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Resolves once [`mark_settled`](Self::mark_settled) has been called.
    pub async fn settled(&self) {
        let mut rx = self.settled.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}
