//! Owns the background task of every running job.
//!
//! Jobs register on spawn and remove themselves when their task ends, so
//! the map only ever holds live work. At shutdown the supervisor stops
//! taking new jobs, cancels the live ones and waits a bounded time for
//! them to wind down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{ChapterflowError, Result};

use super::context::JobContext;

struct ActiveJob {
    context: Arc<JobContext>,
    handle: JoinHandle<()>,
}

type JobMap = Arc<Mutex<HashMap<String, ActiveJob>>>;

#[derive(Clone, Default)]
pub struct JobSupervisor {
    jobs: JobMap,
    closed: Arc<AtomicBool>,
}

fn lock(jobs: &JobMap) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
    jobs.lock().unwrap_or_else(|poisoned| {
        warn!("Supervisor lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepting(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Spawns `work` as the job's task.
    pub fn spawn<F>(&self, context: Arc<JobContext>, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across the spawn so the task's self-removal cannot run
        // before the insert.
        let mut jobs = lock(&self.jobs);
        if !self.is_accepting() {
            return Err(ChapterflowError::ShuttingDown);
        }

        let job_id = context.job_id().to_string();
        let registry = Arc::clone(&self.jobs);
        let key = job_id.clone();
        let handle = tokio::spawn(async move {
            work.await;
            lock(&registry).remove(&key);
        });

        jobs.insert(job_id, ActiveJob { context, handle });
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobContext>> {
        lock(&self.jobs)
            .get(job_id)
            .map(|active| Arc::clone(&active.context))
    }

    pub fn active_jobs(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Cancels every live job, then waits up to `grace` for their tasks.
    /// Tasks still running at the deadline are aborted. Returns how many
    /// had to be aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let active: Vec<(String, ActiveJob)> = lock(&self.jobs).drain().collect();
        if active.is_empty() {
            return 0;
        }

        info!("Draining {} active jobs", active.len());
        for (_, job) in &active {
            job.context.request_cancel();
        }

        let deadline = Instant::now() + grace;
        let mut abandoned = 0;
        for (job_id, job) in active {
            let abort = job.handle.abort_handle();
            match tokio::time::timeout_at(deadline, job.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(job_id = %job_id, "Job task ended abnormally: {}", e),
                Err(_) => {
                    warn!(job_id = %job_id, "Job did not finish within the grace period; abandoning");
                    abort.abort();
                    abandoned += 1;
                }
            }
        }
        abandoned
    }
}
