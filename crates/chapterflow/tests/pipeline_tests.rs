//! End-to-end runs of translate and chapter-upload jobs.

mod common;

use std::time::Duration;

use chapterflow::db::page_repo;
use chapterflow::{ChapterflowError, JobStage, ValidationError};

use common::{entry_bytes, entry_names, page_bytes, ArchiveBuilder, HarnessOptions, ScriptedTransform, TestHarness};

#[tokio::test]
async fn test_metadata_and_non_images_are_skipped() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new()
        .pages(5)
        .directory("__MACOSX/")
        .file("__MACOSX/._001.png", b"resource fork")
        .file(".hidden.png", b"dotfile")
        .file("credits.txt", b"scanlated by")
        .build();

    let receipt = harness.translate(&reader, "vol1.cbz", archive).await.unwrap();
    assert_eq!(receipt.total, 5);

    let job = harness.finish(&receipt.job_id).await;
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.total_items, 5);
    assert_eq!(job.completed_items, 5);
}

#[tokio::test]
async fn test_empty_upload_creates_no_job() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);

    let err = harness.translate(&reader, "vol1.cbz", Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        ChapterflowError::Validation(ValidationError::EmptyUpload)
    ));
    assert_eq!(harness.job_count(), 0);
    assert_eq!(harness.balance("reader"), 100);
}

#[tokio::test]
async fn test_wrong_extension_is_rejected() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().pages(1).build();
    let err = harness.translate(&reader, "vol1.rar", archive).await.unwrap_err();
    assert!(matches!(
        err,
        ChapterflowError::Validation(ValidationError::UnsupportedExtension { .. })
    ));
    assert_eq!(harness.job_count(), 0);
}

#[tokio::test]
async fn test_archive_without_images_fails_and_is_not_charged() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().file("notes.txt", b"nothing here").build();
    let err = harness.translate(&reader, "vol1.zip", archive).await.unwrap_err();
    assert!(matches!(err, ChapterflowError::Extraction(_)));

    // The job record exists and is failed; the ledger never saw it.
    assert_eq!(harness.job_count(), 1);
    assert_eq!(harness.balance("reader"), 100);
}

#[tokio::test]
async fn test_identity_packages_contiguous_pages() {
    let harness = TestHarness::with_options(HarnessOptions {
        worker_count: 2,
        transform: ScriptedTransform::new().delay(Duration::from_millis(20)),
        ..HarnessOptions::default()
    });
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().pages(3).build();
    let receipt = harness.translate(&reader, "vol1.cbz", archive).await.unwrap();
    let job = harness.finish(&receipt.job_id).await;

    assert_eq!(job.stage, JobStage::Completed);
    assert!(harness.transform.peak() <= 2);

    let download = harness.runner.download(&reader, &receipt.job_id).unwrap();
    assert_eq!(
        entry_names(&download.bytes),
        vec!["page_001.png", "page_002.png", "page_003.png"]
    );
    assert_eq!(entry_bytes(&download.bytes, "page_002.png"), page_bytes(2));
}

#[tokio::test]
async fn test_one_failed_page_still_completes() {
    let harness = TestHarness::with_transform(ScriptedTransform::new().failing(&[2]));
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().pages(4).build();
    let receipt = harness.translate(&reader, "vol1.cbz", archive).await.unwrap();
    let job = harness.finish(&receipt.job_id).await;

    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.completed_items, 3);
    assert_eq!(job.failed_items, 1);

    let download = harness.runner.download(&reader, &receipt.job_id).unwrap();
    assert_eq!(
        entry_names(&download.bytes),
        vec!["page_001.png", "page_002.png", "page_003.png"]
    );
    // Page 3 of the upload moves up into the gap left by page 2.
    assert_eq!(entry_bytes(&download.bytes, "page_002.png"), page_bytes(3));
}

#[tokio::test]
async fn test_upload_is_removed_after_job_ends() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().pages(2).build();
    let receipt = harness.translate(&reader, "vol1.cbz", archive).await.unwrap();
    harness.finish(&receipt.job_id).await;

    assert!(!harness.uploads_dir().join(&receipt.job_id).exists());
    let job = harness.runner.wait(&receipt.job_id).await.unwrap();
    let output = job.output_path.unwrap();
    assert!(std::path::Path::new(&output).exists());
    assert_eq!(std::path::Path::new(&output), harness.output_file(&receipt.job_id));
}

#[tokio::test]
async fn test_progress_events_are_broadcast() {
    let harness = TestHarness::new();
    let reader = harness.user("reader", 100);
    let mut events = harness.runner.broadcaster().subscribe();

    let archive = ArchiveBuilder::new().pages(3).build();
    let receipt = harness.translate(&reader, "vol1.cbz", archive).await.unwrap();
    harness.finish(&receipt.job_id).await;

    let mut page_events = 0;
    let mut last_percentage = 0;
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        if event.job_id != receipt.job_id {
            continue;
        }
        assert!(event.percentage >= last_percentage);
        last_percentage = event.percentage;
        if event.page_number.is_some() {
            page_events += 1;
        }
        if event.finished {
            finished = Some(event);
        }
    }

    assert_eq!(page_events, 3);
    let finished = finished.expect("no finished event");
    assert_eq!(finished.stage, JobStage::Completed);
    assert_eq!(finished.percentage, 100);
}

#[tokio::test]
async fn test_analyze_counts_images_without_a_job() {
    let harness = TestHarness::new();

    let archive = ArchiveBuilder::new()
        .pages(4)
        .file("__MACOSX/._001.png", b"fork")
        .file("info.txt", b"text")
        .build();
    let size = archive.len() as u64;

    let summary = harness.runner.analyze("vol1.zip", &archive).unwrap();
    assert_eq!(summary.image_count, 4);
    assert_eq!(summary.file_size, size);
    assert_eq!(harness.job_count(), 0);
}

#[tokio::test]
async fn test_chapter_upload_persists_hosted_pages() {
    let harness = TestHarness::with_transform(ScriptedTransform::new().hosted().failing(&[2]));
    let admin = harness.admin("admin");

    let archive = ArchiveBuilder::new().pages(3).build();
    let receipt = harness.upload_chapter(&admin, 42, archive).await.unwrap();
    let job = harness.finish(&receipt.job_id).await;

    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.cost, 0);
    assert!(job.output_path.is_none());
    assert_eq!(harness.ledger_total(&receipt.job_id), 0);

    let pages = page_repo::list_for_chapter(harness.db(), 42).unwrap();
    let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(pages[0].image_url, "https://img.example.test/001.png");
    assert_eq!(pages[1].image_url, "https://img.example.test/003.png");
    assert_eq!(pages[1].original_filename.as_deref(), Some("003.png"));
    assert_eq!(pages[0].job_id.as_deref(), Some(receipt.job_id.as_str()));

    let err = harness.runner.download(&admin, &receipt.job_id).unwrap_err();
    assert!(matches!(err, ChapterflowError::NotReady { .. }));
}

#[tokio::test]
async fn test_chapter_upload_requires_privilege() {
    let harness = TestHarness::with_transform(ScriptedTransform::new().hosted());
    let reader = harness.user("reader", 100);

    let archive = ArchiveBuilder::new().pages(2).build();
    let err = harness.upload_chapter(&reader, 7, archive).await.unwrap_err();
    assert!(matches!(err, ChapterflowError::Forbidden { .. }));
    assert_eq!(harness.job_count(), 0);
}
