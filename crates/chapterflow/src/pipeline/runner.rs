use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use crate::archive::{package_to_path, renumber, validate_upload, ArchiveExtractor, ArchiveSummary};
use crate::broadcast::JobEventBroadcaster;
use crate::config::Config;
use crate::db::page_repo::{self, ChapterPageRow};
use crate::db::{job_repo, user_repo, Database};
use crate::error::{ChapterflowError, PackagingError, Result, WorkerError};
use crate::ledger::LedgerReconciler;
use crate::progress::{ProgressSnapshot, ProgressStore};
use crate::sanitize;
use crate::storage::FileStorage;
use crate::transform::{ConfiguredTransforms, PageTransform, TransformProvider};
use crate::worker::{FanOutPool, OutputReference, PageStatus, PageTask, PoolEvent, PoolHandle, PoolSummary};

use super::config::PipelineConfig;
use super::context::JobContext;
use super::events::{JobEvent, LedgerSettlement, ProgressProjection, Subscribers};
use super::job::{Job, JobKind};
use super::stage::JobStage;
use super::supervisor::JobSupervisor;
use super::views::{
    download_filename, CancelReceipt, DownloadedArchive, JobReceipt, JobStatusView, JobSummary,
    Principal, SubmitRequest, CBZ_CONTENT_TYPE,
};

/// Entry point for everything a caller can do with jobs.
///
/// Cheap to clone; clones share the same store, supervisor and subscribers.
#[derive(Clone)]
pub struct PipelineRunner {
    shared: Arc<Shared>,
}

struct Shared {
    config: PipelineConfig,
    db: Database,
    storage: FileStorage,
    extractor: ArchiveExtractor,
    pool: FanOutPool,
    transforms: Arc<dyn TransformProvider>,
    ledger: LedgerReconciler,
    progress: ProgressStore,
    broadcaster: JobEventBroadcaster,
    subscribers: Subscribers,
    supervisor: JobSupervisor,
}

fn not_found(job_id: &str) -> ChapterflowError {
    ChapterflowError::NotFound {
        job_id: job_id.to_string(),
    }
}

fn authorize(principal: &Principal, owner_id: &str) -> Result<()> {
    if principal.can_access(owner_id) {
        Ok(())
    } else {
        Err(ChapterflowError::Forbidden {
            reason: "job belongs to another user".to_string(),
        })
    }
}

fn join_error(e: tokio::task::JoinError) -> ChapterflowError {
    WorkerError::Join(e.to_string()).into()
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        db: Database,
        transforms: Arc<dyn TransformProvider>,
    ) -> Result<Self> {
        let pool = FanOutPool::new(config.worker_count)?;
        let ledger = LedgerReconciler::new(db.clone());
        let progress = ProgressStore::new(config.progress_ttl);
        let broadcaster = JobEventBroadcaster::default();
        let subscribers = Subscribers::new()
            .with(Arc::new(ProgressProjection::new(progress.clone())))
            .with(Arc::new(LedgerSettlement::new(ledger.clone())))
            .with(Arc::new(broadcaster.clone()));

        let shared = Shared {
            storage: FileStorage::new(&config.data_directory),
            extractor: ArchiveExtractor::new(config.max_archive_bytes)
                .with_extracted_limit(config.max_extracted_bytes),
            config,
            db,
            pool,
            transforms,
            ledger,
            progress,
            broadcaster,
            subscribers,
            supervisor: JobSupervisor::new(),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Production constructor: opens the database and builds transforms
    /// from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database_path())?;
        let transforms = Arc::new(ConfiguredTransforms::from_config(config)?);
        Self::new(PipelineConfig::from_config(config), db, transforms)
    }

    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    pub fn ledger(&self) -> &LedgerReconciler {
        &self.shared.ledger
    }

    pub fn broadcaster(&self) -> &JobEventBroadcaster {
        &self.shared.broadcaster
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.supervisor.active_jobs()
    }

    /// Looks up a principal by id. `None` for unknown ids.
    pub fn principal(&self, user_id: &str) -> Result<Option<Principal>> {
        let user = user_repo::find_by_id(&self.shared.db, user_id)?;
        Ok(user.as_ref().map(Principal::from))
    }

    /// Validates, persists and extracts the upload, charges for it, then
    /// hands the pages to a background task. Returns once the job is
    /// running; page work never blocks the caller.
    pub async fn submit(&self, principal: &Principal, request: SubmitRequest) -> Result<JobReceipt> {
        let shared = &self.shared;
        if !shared.supervisor.is_accepting() {
            return Err(ChapterflowError::ShuttingDown);
        }

        let SubmitRequest {
            filename,
            bytes,
            kind,
        } = request;

        if matches!(kind, JobKind::ChapterUpload { .. }) && !principal.is_privileged {
            return Err(ChapterflowError::Forbidden {
                reason: "chapter uploads require a privileged account".to_string(),
            });
        }

        validate_upload(&filename, &bytes, shared.config.max_archive_bytes)?;

        let cost = match kind {
            JobKind::Translate => shared.config.translation_cost,
            JobKind::ChapterUpload { .. } => 0,
        };
        shared.ledger.precheck(&principal.id, cost)?;
        let transform = shared.transforms.for_job(&kind)?;

        let mut job = Job::new(kind, &principal.id, &filename, cost);
        job_repo::insert(&shared.db, &job)?;
        shared.subscribers.publish(&JobEvent::stage_changed(&job));

        let span = info_span!(
            "job",
            job_id = %job.id,
            kind = job.kind.as_str(),
            filename = %sanitize::redact_path(Path::new(&filename)),
        );

        let tasks = match shared.prepare(&mut job, bytes).instrument(span.clone()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                shared.abort_submission(&mut job, &e);
                return Err(e);
            }
        };

        let receipt = JobReceipt {
            job_id: job.id.clone(),
            total: job.total_items,
        };

        let context = Arc::new(JobContext::new(job.clone()));
        let work = Arc::clone(shared)
            .run_job(Arc::clone(&context), tasks, transform)
            .instrument(span);
        if let Err(e) = shared.supervisor.spawn(context, work) {
            shared.abort_submission(&mut job, &e);
            return Err(e);
        }

        info!(job_id = %receipt.job_id, pages = receipt.total, "Job accepted");
        Ok(receipt)
    }

    /// Progress for polling clients. Served from the progress store when it
    /// has a snapshot, otherwise re-projected from the job record.
    pub fn status(&self, principal: &Principal, job_id: &str) -> Result<JobStatusView> {
        let shared = &self.shared;
        let snapshot = match shared.progress.get(job_id) {
            Some(snapshot) => snapshot,
            None => {
                let job = job_repo::find_by_id(&shared.db, job_id)?.ok_or_else(|| not_found(job_id))?;
                // A worker may have written a newer snapshot since the read.
                shared.progress.insert_if_absent(ProgressSnapshot::from(&job))
            }
        };

        authorize(principal, &snapshot.owner_id)?;
        Ok(JobStatusView::from(snapshot))
    }

    /// The caller's jobs, newest first. Privileged callers see every job.
    pub fn list_jobs(&self, principal: &Principal) -> Result<Vec<JobSummary>> {
        let owner = (!principal.is_privileged).then_some(principal.id.as_str());
        let jobs = job_repo::list(&self.shared.db, owner)?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    /// Removes a finished job together with its packaged archive. Jobs that
    /// are still running, or still settling, are refused.
    pub fn delete(&self, principal: &Principal, job_id: &str) -> Result<()> {
        let shared = &self.shared;
        let job = job_repo::find_by_id(&shared.db, job_id)?.ok_or_else(|| not_found(job_id))?;
        authorize(principal, &job.owner_id)?;

        let still_running = || ChapterflowError::StillRunning {
            job_id: job.id.clone(),
            stage: job.stage,
        };
        let settling = shared
            .supervisor
            .get(job_id)
            .is_some_and(|context| !context.is_settled());
        if !job.stage.is_terminal() || settling {
            return Err(still_running());
        }
        if !job_repo::delete_finished(&shared.db, job_id)? {
            return Err(still_running());
        }

        shared.progress.remove(job_id);
        shared.cleanup(job_id);
        if let Err(e) = shared.storage.remove_output(job_id) {
            warn!(job_id, "Failed to remove packaged archive: {}", e);
        }
        info!(job_id, "Job deleted");
        Ok(())
    }

    /// Requests cooperative cancellation. Pages already running finish;
    /// no new pages are dispatched.
    pub fn cancel(&self, principal: &Principal, job_id: &str) -> Result<CancelReceipt> {
        let shared = &self.shared;

        if let Some(context) = shared.supervisor.get(job_id) {
            authorize(principal, &context.snapshot().owner_id)?;
            let cancelled = context.request_cancel();
            info!(job_id, cancelled, "Cancel requested");
            return Ok(CancelReceipt {
                job_id: job_id.to_string(),
                cancelled,
                stage: context.snapshot().stage,
            });
        }

        let job = job_repo::find_by_id(&shared.db, job_id)?.ok_or_else(|| not_found(job_id))?;
        authorize(principal, &job.owner_id)?;
        Ok(CancelReceipt {
            job_id: job.id,
            cancelled: false,
            stage: job.stage,
        })
    }

    pub fn download(&self, principal: &Principal, job_id: &str) -> Result<DownloadedArchive> {
        let shared = &self.shared;
        let job = job_repo::find_by_id(&shared.db, job_id)?.ok_or_else(|| not_found(job_id))?;
        authorize(principal, &job.owner_id)?;

        let path = match (&job.kind, job.stage, &job.output_path) {
            (JobKind::Translate, JobStage::Completed, Some(path)) => path,
            _ => {
                return Err(ChapterflowError::NotReady {
                    job_id: job.id,
                    stage: job.stage,
                })
            }
        };

        let bytes = shared.storage.read(Path::new(path))?;
        Ok(DownloadedArchive {
            filename: download_filename(&job.original_filename),
            content_type: CBZ_CONTENT_TYPE,
            bytes,
        })
    }

    /// Counts the images an upload would produce without creating a job.
    pub fn analyze(&self, filename: &str, bytes: &[u8]) -> Result<ArchiveSummary> {
        validate_upload(filename, bytes, self.shared.config.max_archive_bytes)?;
        Ok(self.shared.extractor.analyze(bytes)?)
    }

    /// Resolves once the job has reached a terminal stage and that stage is
    /// persisted. Returns the final job record.
    pub async fn wait(&self, job_id: &str) -> Result<Job> {
        if let Some(context) = self.shared.supervisor.get(job_id) {
            context.settled().await;
        }
        job_repo::find_by_id(&self.shared.db, job_id)?.ok_or_else(|| not_found(job_id))
    }

    /// Stops accepting jobs, cancels the running ones and waits up to
    /// `grace` for them. Returns how many were abandoned; those are failed
    /// and refunded by [`recover_interrupted`](Self::recover_interrupted)
    /// on the next start.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let abandoned = self.shared.supervisor.drain(grace).await;
        if abandoned > 0 {
            warn!("{} jobs abandoned at shutdown", abandoned);
        } else {
            info!("All jobs drained");
        }
        abandoned
    }

    /// Fails every job left non-terminal by an earlier process. Charged jobs
    /// are refunded through the usual settlement path.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let shared = &self.shared;
        let mut recovered = 0;

        for mut job in job_repo::find_unfinished(&shared.db)? {
            if shared.supervisor.get(&job.id).is_some() {
                continue;
            }
            job.fail("interrupted before finishing");
            job_repo::update(&shared.db, &job)?;
            shared.subscribers.publish(&JobEvent::finished(&job));
            shared.cleanup(&job.id);
            warn!(job_id = %job.id, "Recovered interrupted job");
            recovered += 1;
        }

        Ok(recovered)
    }
}

impl Shared {
    /// Persists the upload, extracts pages, fixes the total and charges.
    async fn prepare(&self, job: &mut Job, bytes: Vec<u8>) -> Result<Vec<PageTask>> {
        let extension = Path::new(&job.original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "zip".to_string());
        self.storage.persist_upload(&job.id, &extension, &bytes)?;

        job.transition(JobStage::Extracting)?;
        self.checkpoint(job)?;

        let extractor = self.extractor;
        let tasks = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .instrument(info_span!("extract"))
            .await
            .map_err(join_error)??;

        job.set_total(tasks.len() as u32)?;
        job_repo::update(&self.db, job)?;

        if self.ledger.charge(job)? {
            job.cost_charged = true;
        }
        Ok(tasks)
    }

    /// Fails a job that never made it to its background task.
    fn abort_submission(&self, job: &mut Job, cause: &ChapterflowError) {
        job.fail(cause.to_string());
        error!(job_id = %job.id, "Job failed before dispatch: {}", cause);
        if let Err(e) = job_repo::update(&self.db, job) {
            error!(job_id = %job.id, "Failed to persist failed job: {}", e);
        }
        self.subscribers.publish(&JobEvent::finished(job));
        self.cleanup(&job.id);
    }

    fn checkpoint(&self, job: &Job) -> Result<()> {
        job_repo::update(&self.db, job)?;
        self.subscribers.publish(&JobEvent::stage_changed(job));
        Ok(())
    }

    fn cleanup(&self, job_id: &str) {
        if let Err(e) = self.storage.cleanup_job(job_id) {
            warn!(job_id, "Failed to remove upload: {}", e);
        }
    }

    /// The job's background task. Always leaves the job terminal, persisted
    /// and announced.
    async fn run_job(
        self: Arc<Self>,
        context: Arc<JobContext>,
        tasks: Vec<PageTask>,
        transform: Arc<dyn PageTransform>,
    ) {
        let driven = self.drive(&context, tasks, transform);
        let failure = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, driven).await {
                Ok(result) => result.err().map(|e| e.to_string()),
                Err(_) => {
                    context.abandon();
                    context.request_cancel();
                    Some(format!("job exceeded its {}s deadline", limit.as_secs()))
                }
            },
            None => driven.await.err().map(|e| e.to_string()),
        };

        let (_, job) = context.update(|job| match failure {
            Some(reason) => job.fail(reason),
            None if !job.stage.is_terminal() => job.fail("job ended without reaching a terminal stage"),
            None => false,
        });

        match job.stage {
            JobStage::Completed => info!(
                completed = job.completed_items,
                failed = job.failed_items,
                "Job completed"
            ),
            JobStage::Cancelled => info!(completed = job.completed_items, "Job cancelled"),
            _ => error!(
                "Job failed: {}",
                job.error_text.as_deref().unwrap_or("unknown error")
            ),
        }

        if job.stage != JobStage::Completed {
            if let Err(e) = self.storage.remove_output(&job.id) {
                warn!("Failed to remove partial output: {}", e);
            }
        }

        if let Err(e) = job_repo::update(&self.db, &job) {
            error!("Failed to persist terminal job state: {}", e);
        }
        self.subscribers.publish(&JobEvent::finished(&job));
        self.cleanup(&job.id);
        context.mark_settled();
    }

    async fn drive(
        &self,
        context: &JobContext,
        tasks: Vec<PageTask>,
        transform: Arc<dyn PageTransform>,
    ) -> Result<()> {
        if context.is_cancelled() {
            let (moved, _) = context.update(|job| job.transition(JobStage::Cancelled));
            return moved;
        }

        let (moved, job) = context.update(|job| {
            let next = job.kind.working_stage();
            job.transition(next)
        });
        moved?;
        self.checkpoint(&job)?;

        let pages = tasks.len();
        let handle = self.pool.run(tasks, transform, context.cancel_flag());
        let (summary, finished) = self
            .collect(context, handle)
            .instrument(info_span!("fan_out", pages))
            .await?;

        if summary.was_cancelled() {
            let (moved, _) = context.update(|job| job.transition(JobStage::Cancelled));
            info!(skipped = summary.skipped, "Stopped dispatching after cancel");
            return moved;
        }

        if summary.counts.succeeded == 0 {
            context.update(|job| job.fail(format!("all {} pages failed", summary.counts.total)));
            return Ok(());
        }

        let (moved, job) = context.update(|job| job.transition(JobStage::Packaging));
        moved?;
        self.checkpoint(&job)?;

        let output_path = self
            .package(context, &job, finished)
            .instrument(info_span!("package"))
            .await?;

        let (moved, _) = context.update(|job| {
            job.output_path = output_path;
            job.transition(JobStage::Completed)
        });
        moved
    }

    /// Applies pool events to the job until the pool reports its summary.
    async fn collect(
        &self,
        context: &JobContext,
        mut handle: PoolHandle,
    ) -> Result<(PoolSummary, Vec<PageTask>)> {
        let mut finished = Vec::new();
        loop {
            match handle.next_event().await {
                Some(PoolEvent::TaskDone { task, .. }) => {
                    let succeeded = task.status == PageStatus::Succeeded;
                    let (counted, job) = context.update(|job| job.record_page(succeeded));
                    if !counted {
                        warn!(page = task.page_number, "Page result arrived after the count was full");
                    }

                    job_repo::update(&self.db, &job)?;
                    self.subscribers.publish(&JobEvent::page_finished(
                        &job,
                        task.page_number,
                        succeeded,
                        task.error.clone(),
                    ));
                    finished.push(task);
                }
                Some(PoolEvent::AllDone(summary)) => return Ok((summary, finished)),
                Some(PoolEvent::Fatal(reason)) => return Err(WorkerError::PoolFatal(reason).into()),
                None => {
                    return Err(WorkerError::PoolFatal(
                        "pool stopped without reporting a summary".to_string(),
                    )
                    .into())
                }
            }
        }
    }

    /// Produces the job's output. Translate jobs get a packaged archive on
    /// disk; chapter uploads replace the chapter's page records.
    ///
    /// The archive write runs on the blocking pool and outlives a timed-out
    /// job task, so it removes its own file once the job is abandoned.
    async fn package(
        &self,
        context: &JobContext,
        job: &Job,
        tasks: Vec<PageTask>,
    ) -> Result<Option<String>> {
        match &job.kind {
            JobKind::Translate => {
                let path = self.storage.output_path(&job.id)?;
                let target = path.clone();
                let abandoned = context.abandoned_flag();
                let entries = tokio::task::spawn_blocking(move || {
                    let entries = package_to_path(&tasks, &target)?;
                    if abandoned.is_cancelled() {
                        let _ = std::fs::remove_file(&target);
                        return Err(PackagingError::Abandoned);
                    }
                    Ok(entries)
                })
                .await
                .map_err(join_error)??;
                info!(entries = entries.len(), "Packaged archive");
                Ok(Some(path.to_string_lossy().into_owned()))
            }
            JobKind::ChapterUpload { chapter_id, .. } => {
                let rows = renumber(&tasks)
                    .into_iter()
                    .map(|page| match &page.task.output {
                        Some(OutputReference::Hosted { url, width, height }) => Ok(ChapterPageRow {
                            chapter_id: *chapter_id,
                            page_number: page.position,
                            image_url: url.clone(),
                            width: *width,
                            height: *height,
                            original_filename: Some(page.task.file_name().to_string()),
                            job_id: Some(job.id.clone()),
                        }),
                        _ => Err(PackagingError::NotHosted {
                            page_number: page.task.page_number,
                        }),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let stored = page_repo::replace_for_chapter(&self.db, *chapter_id, &rows)?;
                info!(pages = stored, chapter_id, "Persisted chapter pages");
                Ok(None)
            }
        }
    }
}
