//! Integration tests for resuming jobs from stored checkpoints

use std::sync::Arc;

use index_backfill::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, Phase};
use index_backfill::shutdown::ShutdownCoordinator;
use index_backfill::sync::{Job, PhaseOutcome, SyncEngine};
use serde_json::json;
use tempfile::TempDir;

use crate::common::{engine, fast_settings, five_rows, FakeIndex, FakeSource, MemoryStore};

#[tokio::test]
async fn test_scan_resumes_after_stored_cursor() {
    let mut stored = Checkpoint::new("backfill_created_at");
    stored.cursor = "b".to_string();
    stored.batch_number = 4;
    stored.counters.total_processed = 2;
    stored.counters.updated_index = 2;

    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["a", "b", "c", "d", "e"]));
    let store = Arc::new(MemoryStore::new().with_checkpoint(stored));
    let engine = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        fast_settings(2, 250),
        ShutdownCoordinator::shared(),
    );

    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(source.fetch_cursors()[0], "b");
    assert_eq!(
        index.updated_ids(),
        vec!["c".to_string(), "d".to_string(), "e".to_string()]
    );
    assert_eq!(index.field("a", "created_at"), None);

    let first_save = &store.saves()[0];
    assert_eq!(first_save.cursor, "d");
    assert_eq!(first_save.batch_number, 5);
    assert_eq!(report.checkpoint.counters.total_processed, 5);
    assert_eq!(report.checkpoint.counters.updated_index, 5);
}

#[tokio::test]
async fn test_reconciling_checkpoint_skips_scan() {
    let mut stored = Checkpoint::new("backfill_created_at");
    stored.phase = Phase::Reconciling;
    stored.cursor = "zz".to_string();
    stored.page = 1;
    stored.batch_number = 10;

    let source = Arc::new(FakeSource::new());
    let index = Arc::new(FakeIndex::new().with_docs(&["a", "b", "c", "d", "e", "f"]));
    let store = Arc::new(MemoryStore::new().with_checkpoint(stored));
    let engine = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        fast_settings(10, 2),
        ShutdownCoordinator::shared(),
    );

    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert!(source.fetch_cursors().is_empty());
    assert_eq!(*index.listed_pages.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(index.field("a", "created_at"), None);
    assert_eq!(index.field("c", "created_at"), Some(json!(0)));
    assert_eq!(report.checkpoint.counters.default_set_count, 4);
    assert_eq!(report.checkpoint.page, 3);
    assert_eq!(report.checkpoint.batch_number, 12);
}

#[tokio::test]
async fn test_resume_from_loosely_typed_file_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    std::fs::write(
        store.path_for("backfill_created_at"),
        json!({
            "_id": "backfill_created_at",
            "phase": "1",
            "last_id": "c",
            "batch_no": 2.0,
            "total_processed": 3.0,
            "updated_typesense": "3",
            "last_updated": "2024-01-01 00:00:00"
        })
        .to_string(),
    )
    .unwrap();

    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["a", "b", "c", "d", "e"]));
    let engine = SyncEngine::new(
        source.clone(),
        index.clone(),
        store.clone(),
        Job::CreatedAt.plan(),
        fast_settings(10, 250),
        ShutdownCoordinator::shared(),
    );

    let report = engine.run().await.unwrap();

    assert_eq!(source.fetch_cursors()[0], "c");
    assert_eq!(report.checkpoint.batch_number, 4);
    assert_eq!(report.checkpoint.counters.total_processed, 5);
    assert_eq!(report.checkpoint.counters.updated_index, 5);

    let reloaded = store.load("backfill_created_at").await.unwrap();
    assert_eq!(reloaded, report.checkpoint);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path_for("backfill_created_at")).unwrap())
            .unwrap();
    assert_eq!(raw["phase"], json!(2));
    assert_eq!(raw["batch_no"], json!(4));
    assert!(raw["last_updated"].is_string());
}

#[tokio::test]
async fn test_completed_job_rerun_is_idempotent() {
    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["a", "b", "c", "d", "e", "f"]));
    let store = Arc::new(MemoryStore::new());
    let settings = fast_settings(2, 250);

    let first = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        settings.clone(),
        ShutdownCoordinator::shared(),
    )
    .run()
    .await
    .unwrap();
    let updates_after_first = index.update_count();

    let second = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        settings,
        ShutdownCoordinator::shared(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(second.outcome, PhaseOutcome::Completed);
    assert_eq!(second.checkpoint.counters, first.checkpoint.counters);
    assert_eq!(index.update_count(), updates_after_first);
}
