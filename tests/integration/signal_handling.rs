//! Integration tests for graceful shutdown

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use index_backfill::checkpoint::{Checkpoint, Phase};
use index_backfill::shutdown::ShutdownCoordinator;
use index_backfill::sync::{EngineSettings, Job, PhaseOutcome};

use crate::common::{engine, fast_settings, five_rows, FakeIndex, MemoryStore};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Requesting shutdown before anyone waits must not be lost.
#[tokio::test]
async fn shutdown_requested_before_wait_no_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

#[tokio::test]
async fn shutdown_mid_batch_saves_once_without_advancing_cursor() {
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["a", "b", "c", "d", "e"]));
    index.shutdown_after_updates(2, shutdown.clone());
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        fast_settings(4, 250),
        shutdown,
    );

    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Interrupted);
    assert_eq!(index.updated_ids(), vec!["a".to_string(), "b".to_string()]);

    let saves = store.saves();
    assert_eq!(saves.len(), 1);
    let saved = &saves[0];
    assert_eq!(saved.phase, Phase::Scanning);
    assert_eq!(saved.cursor, "");
    assert_eq!(saved.batch_number, 0);
    assert_eq!(saved.counters.updated_index, 2);
    assert_eq!(saved.counters.total_processed, 2);
    assert_eq!(*saved, report.checkpoint);
}

#[tokio::test]
async fn shutdown_before_run_fetches_nothing() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["a"]));
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &source,
        &index,
        &store,
        Job::InventoryFields.plan(),
        fast_settings(4, 250),
        shutdown,
    );

    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Interrupted);
    assert!(source.fetch_cursors().is_empty());
    assert!(index.listed_pages.lock().unwrap().is_empty());
    assert_eq!(store.saves(), vec![Checkpoint::new("backfill_inventory_fields")]);
}

#[tokio::test]
async fn shutdown_cuts_retry_sleep_short() {
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(five_rows());
    source.fetch_failures.store(1, Ordering::SeqCst);
    let index = Arc::new(FakeIndex::new());
    let store = Arc::new(MemoryStore::new());
    let settings = EngineSettings {
        batch_size: 2,
        page_size: 250,
        batch_delay: Duration::from_secs(60),
        retry_delay: Duration::from_secs(60),
    };
    let engine = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        settings,
        shutdown.clone(),
    );

    let requester = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.request_shutdown();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(engine.run(), requester)
    })
    .await
    .expect("engine did not stop during the retry sleep");

    let report = result.unwrap();
    assert_eq!(report.outcome, PhaseOutcome::Interrupted);
    assert_eq!(source.fetch_cursors(), vec![""]);
    assert_eq!(store.saves().len(), 1);
}

#[tokio::test]
async fn shutdown_during_reconciliation_keeps_page() {
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(five_rows());
    let index = Arc::new(FakeIndex::new().with_docs(&["x", "y", "z"]));
    index.shutdown_after_updates(1, shutdown.clone());
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &source,
        &index,
        &store,
        Job::CreatedAt.plan(),
        fast_settings(10, 250),
        shutdown,
    );

    let mut checkpoint = Checkpoint::new("backfill_created_at");
    checkpoint.phase = Phase::Reconciling;
    checkpoint.page = 2;
    let outcome = engine.run_reconciliation_phase(&mut checkpoint).await.unwrap();

    // Page 2 of a three-document catalog at 250 per page is already empty
    assert_eq!(outcome, PhaseOutcome::Completed);

    checkpoint.page = 0;
    let outcome = engine.run_reconciliation_phase(&mut checkpoint).await.unwrap();
    assert_eq!(outcome, PhaseOutcome::Interrupted);
    assert_eq!(checkpoint.page, 0);
    assert_eq!(checkpoint.counters.default_set_count, 1);
    assert_eq!(store.saves().len(), 1);
}
