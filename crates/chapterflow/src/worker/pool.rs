use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::WorkerError;
use crate::transform::{PageTransform, TransformError};
use crate::worker::page::{PageStatus, PageTask};
use crate::worker::CancelFlag;

/// Aggregate counts for one pool run. Only ever mutated under the pool's
/// tally lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PoolCounts {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub counts: PoolCounts,
    pub dispatched: usize,
    /// Tasks never started because cancellation was observed first.
    pub skipped: usize,
}

impl PoolSummary {
    pub fn was_cancelled(&self) -> bool {
        self.skipped > 0
    }
}

#[derive(Debug)]
pub enum PoolEvent {
    /// Exactly one per dispatched task, in completion order.
    TaskDone { task: PageTask, counts: PoolCounts },
    /// Final aggregate. Sent once, after every dispatched task has reported.
    AllDone(PoolSummary),
    /// The pool itself failed; no `AllDone` follows and counts are not final.
    Fatal(String),
}

/// Receiving side of a running pool.
pub struct PoolHandle {
    events: mpsc::UnboundedReceiver<PoolEvent>,
    orchestrator: JoinHandle<()>,
}

impl PoolHandle {
    /// Next event, or `None` once the pool has stopped sending.
    pub async fn next_event(&mut self) -> Option<PoolEvent> {
        self.events.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.orchestrator.is_finished()
    }
}

/// Runs page tasks with at most `max_in_flight` executing at once.
///
/// Tasks are admitted in page order as permits free up. Cancellation is
/// cooperative: the flag is checked before each task is dispatched and
/// tasks already running are allowed to finish.
pub struct FanOutPool {
    max_in_flight: usize,
}

impl FanOutPool {
    pub fn new(max_in_flight: usize) -> Result<Self, WorkerError> {
        if max_in_flight == 0 {
            return Err(WorkerError::ZeroCapacity);
        }
        Ok(Self { max_in_flight })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Starts the run in the background and returns immediately.
    pub fn run(
        &self,
        tasks: Vec<PageTask>,
        worker: Arc<dyn PageTransform>,
        cancel: CancelFlag,
    ) -> PoolHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let max_in_flight = self.max_in_flight;

        let orchestrator = tokio::spawn(async move {
            let fatal_tx = tx.clone();
            if let Err(e) = orchestrate(tasks, worker, cancel, max_in_flight, tx).await {
                error!("Worker pool failed: {}", e);
                let _ = fatal_tx.send(PoolEvent::Fatal(e.to_string()));
            }
        });

        PoolHandle {
            events,
            orchestrator,
        }
    }
}

async fn orchestrate(
    tasks: Vec<PageTask>,
    worker: Arc<dyn PageTransform>,
    cancel: CancelFlag,
    max_in_flight: usize,
    tx: mpsc::UnboundedSender<PoolEvent>,
) -> Result<(), WorkerError> {
    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(max_in_flight));
    let tally = Arc::new(Mutex::new(PoolCounts {
        total,
        ..PoolCounts::default()
    }));
    let mut running = JoinSet::new();
    let mut dispatched = 0;

    info!(
        "Dispatching {} page tasks to '{}' with {} in flight",
        total,
        worker.name(),
        max_in_flight
    );

    for task in tasks {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| WorkerError::PoolFatal(format!("semaphore closed: {}", e)))?;

        if cancel.is_cancelled() {
            debug!("Cancellation observed before page {}", task.page_number);
            break;
        }

        dispatched += 1;
        let worker = Arc::clone(&worker);
        let tally = Arc::clone(&tally);
        let tx = tx.clone();

        running.spawn(async move {
            let _permit = permit;
            let task = run_one(worker.as_ref(), task).await;
            let counts = record(&tally, &task);
            let _ = tx.send(PoolEvent::TaskDone { task, counts });
        });
    }

    while let Some(joined) = running.join_next().await {
        joined.map_err(|e| WorkerError::Join(e.to_string()))?;
    }

    let counts = *lock_tally(&tally);
    let summary = PoolSummary {
        counts,
        dispatched,
        skipped: total - dispatched,
    };
    info!(
        "Pool finished: {} succeeded, {} failed, {} skipped",
        counts.succeeded, counts.failed, summary.skipped
    );
    let _ = tx.send(PoolEvent::AllDone(summary));

    Ok(())
}

/// Runs the transform for one task. A panic inside the transform becomes a
/// page failure instead of taking the pool down.
async fn run_one(worker: &dyn PageTransform, mut task: PageTask) -> PageTask {
    let outcome = AssertUnwindSafe(worker.transform(&task))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(TransformError::Panicked(panic_message(&*panic))));

    match outcome {
        Ok(output) => {
            debug!("Page {} succeeded", task.page_number);
            task.succeed(output);
        }
        Err(e) => {
            warn!("Page {} failed: {}", task.page_number, e);
            task.fail(e.to_string());
        }
    }
    task
}

fn record(tally: &Mutex<PoolCounts>, task: &PageTask) -> PoolCounts {
    let mut counts = lock_tally(tally);
    if task.status == PageStatus::Failed {
        counts.failed += 1;
    } else {
        counts.succeeded += 1;
    }
    *counts
}

fn lock_tally(tally: &Mutex<PoolCounts>) -> std::sync::MutexGuard<'_, PoolCounts> {
    tally.lock().unwrap_or_else(|poisoned| {
        warn!("Pool tally lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
