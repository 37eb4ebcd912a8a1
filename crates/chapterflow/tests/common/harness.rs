//! Test harness for running whole jobs in isolation.
//!
//! Every harness gets its own temp data directory and in-memory database,
//! so tests can run in parallel without sharing state.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use chapterflow::db::user_repo::{self, NewUser};
use chapterflow::db::ledger_repo;
use chapterflow::{
    ChapterflowError, Database, Job, JobKind, JobReceipt, OutputReference, PageTask,
    PageTransform, PipelineConfig, PipelineRunner, Principal, SubmitRequest, TransformError,
    TransformProvider,
};

pub const TRANSLATION_COST: i64 = 20;

/// Transform whose behaviour each test scripts up front.
///
/// Pages listed in `failing` fail; every page sleeps for `delay` first.
/// With `hosted` set, successful pages come back as hosted URLs instead of
/// inline bytes.
pub struct ScriptedTransform {
    failing: HashSet<u32>,
    delay: Duration,
    hosted: bool,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransform {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            delay: Duration::ZERO,
            hosted: false,
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, pages: &[u32]) -> Self {
        self.failing = pages.iter().copied().collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hosted(mut self) -> Self {
        self.hosted = true;
        self
    }

    /// Pages the pool has handed to this transform so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Highest number of pages observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedTransform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageTransform for ScriptedTransform {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transform(&self, task: &PageTask) -> Result<OutputReference, TransformError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&task.page_number) {
            return Err(TransformError::Status {
                status: 500,
                body: format!("page {} rejected", task.page_number),
            });
        }

        if self.hosted {
            return Ok(OutputReference::Hosted {
                url: format!("https://img.example.test/{}", task.file_name()),
                width: 800,
                height: 1200,
            });
        }

        Ok(OutputReference::Inline {
            bytes: task.input.clone(),
            extension: task.extension(),
        })
    }
}

struct ScriptedProvider(Arc<ScriptedTransform>);

impl TransformProvider for ScriptedProvider {
    fn for_job(&self, _kind: &JobKind) -> Result<Arc<dyn PageTransform>, ChapterflowError> {
        Ok(Arc::clone(&self.0) as Arc<dyn PageTransform>)
    }
}

/// Knobs for [`TestHarness::with_options`].
pub struct HarnessOptions {
    pub worker_count: usize,
    pub progress_ttl: Duration,
    pub job_timeout: Option<Duration>,
    pub transform: ScriptedTransform,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            worker_count: 2,
            progress_ttl: Duration::from_secs(60),
            job_timeout: None,
            transform: ScriptedTransform::new(),
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub runner: PipelineRunner,
    pub transform: Arc<ScriptedTransform>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_transform(transform: ScriptedTransform) -> Self {
        Self::with_options(HarnessOptions {
            transform,
            ..HarnessOptions::default()
        })
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        let transform = Arc::new(options.transform);

        let config = PipelineConfig {
            data_directory: temp_dir.path().to_path_buf(),
            worker_count: options.worker_count,
            max_archive_bytes: 10 * 1024 * 1024,
            max_extracted_bytes: 40 * 1024 * 1024,
            progress_ttl: options.progress_ttl,
            job_timeout: options.job_timeout,
            translation_cost: TRANSLATION_COST,
        };
        let runner = PipelineRunner::new(
            config,
            db,
            Arc::new(ScriptedProvider(Arc::clone(&transform))),
        )
        .expect("Failed to build runner");

        Self {
            temp_dir,
            runner,
            transform,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir().join("uploads")
    }

    pub fn output_file(&self, job_id: &str) -> PathBuf {
        self.data_dir()
            .join("outputs")
            .join(format!("translated_{}.cbz", job_id))
    }

    pub fn db(&self) -> &Database {
        self.runner.database()
    }

    /// Seeds a user and returns them as a principal.
    pub fn user(&self, id: &str, points: i64) -> Principal {
        self.seed(id, points, false)
    }

    pub fn admin(&self, id: &str) -> Principal {
        self.seed(id, 0, true)
    }

    fn seed(&self, id: &str, points: i64, is_privileged: bool) -> Principal {
        let user = user_repo::create(
            self.db(),
            &NewUser {
                id: Some(id.to_string()),
                username: id.to_string(),
                points: Some(points),
                is_privileged,
            },
        )
        .expect("Failed to seed user");
        Principal::from(&user)
    }

    pub fn balance(&self, user_id: &str) -> i64 {
        self.runner.ledger().balance(user_id).unwrap()
    }

    pub fn ledger_total(&self, job_id: &str) -> i64 {
        ledger_repo::job_total(self.db(), job_id).unwrap()
    }

    pub fn job_count(&self) -> i64 {
        self.db()
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?))
            .unwrap()
    }

    pub async fn translate(
        &self,
        principal: &Principal,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<JobReceipt, ChapterflowError> {
        self.runner
            .submit(
                principal,
                SubmitRequest {
                    filename: filename.to_string(),
                    bytes,
                    kind: JobKind::Translate,
                },
            )
            .await
    }

    pub async fn upload_chapter(
        &self,
        principal: &Principal,
        chapter_id: i64,
        bytes: Vec<u8>,
    ) -> Result<JobReceipt, ChapterflowError> {
        self.runner
            .submit(
                principal,
                SubmitRequest {
                    filename: "chapter.zip".to_string(),
                    bytes,
                    kind: JobKind::ChapterUpload {
                        chapter_id,
                        title: "Test Series".to_string(),
                        chapter_number: 3,
                    },
                },
            )
            .await
    }

    pub async fn finish(&self, job_id: &str) -> Job {
        tokio::time::timeout(Duration::from_secs(10), self.runner.wait(job_id))
            .await
            .expect("Job did not finish in time")
            .expect("Job lookup failed")
    }

    /// Polls until the transform has been handed `n` pages.
    pub async fn wait_for_started(&self, n: usize) {
        for _ in 0..500 {
            if self.transform.started() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("only {} pages started, expected {}", self.transform.started(), n);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
