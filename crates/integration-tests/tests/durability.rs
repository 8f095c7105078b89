//! Durability Integration Tests
//!
//! Queues backed by the local SQLite store, built through the factory the
//! way the daemon builds them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use spool_core::application::{Lifecycle, ManagedQueue, QueueHandle, QueueManager, UniqueQueue};
use spool_core::domain::{QueueConfig, QueueKind, QueueState};
use spool_core::port::handler::mocks::RecordingHandler;
use spool_daemon::QueueFactory;

fn config(name: &str, dir: &Path) -> QueueConfig {
    QueueConfig {
        data_dir: Some(dir.join(name)),
        ..QueueConfig::new(name)
    }
}

async fn create(
    kind: QueueKind,
    config: &QueueConfig,
    handler: Arc<RecordingHandler<String>>,
) -> QueueHandle<String> {
    QueueFactory::new(Arc::new(QueueManager::new()))
        .create::<String>(kind, config, handler)
        .await
        .unwrap()
}

/// Items accepted by a hybrid queue but never handled come back after restart
#[tokio::test]
async fn test_persistable_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        queue_length: 10,
        batch_length: 2,
        ..config("restart", dir.path())
    };

    // First run: accept 10 items, shut down before any worker starts
    {
        let handler = Arc::new(RecordingHandler::new());
        let handle = create(QueueKind::PersistableChannel, &config, handler.clone()).await;
        for i in 0..10 {
            handle.push(format!("item-{}", i)).await.unwrap();
        }
        handle.lifecycle().shutdown().await;
        handle.lifecycle().terminate().await;
        assert_eq!(handle.managed().state(), QueueState::Terminated);
        assert_eq!(handler.item_count(), 0);
    }

    // Second run on the same directory: everything is delivered
    let handler = Arc::new(RecordingHandler::new());
    let handle = create(QueueKind::PersistableChannel, &config, handler.clone()).await;
    handle.lifecycle().run().await.unwrap();

    assert!(handler.wait_for_items(10, Duration::from_secs(10)).await);
    let mut items = handler.items();
    items.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
    expected.sort();
    assert_eq!(items, expected);
    assert!(handler.batches().iter().all(|batch| batch.len() <= 2));

    handle.managed().flush(Duration::from_secs(10)).await.unwrap();
    handle.lifecycle().terminate().await;
}

/// Disk queue with one worker and batches of two hands over ["A", "B"] at once
#[tokio::test]
async fn test_level_queue_batches_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        workers: 1,
        batch_length: 2,
        ..config("level", dir.path())
    };
    let handler = Arc::new(RecordingHandler::new());
    let handle = create(QueueKind::Level, &config, handler.clone()).await;

    handle.push("A".to_string()).await.unwrap();
    handle.push("B".to_string()).await.unwrap();
    handle.lifecycle().run().await.unwrap();

    assert!(handler.wait_for_items(2, Duration::from_secs(10)).await);
    assert_eq!(
        handler.batches(),
        vec![vec!["A".to_string(), "B".to_string()]]
    );
    handle.lifecycle().terminate().await;
}

/// The unique disk queue rejects a duplicate until the first copy is dequeued
#[tokio::test]
async fn test_unique_level_rejects_pending_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        workers: 1,
        batch_length: 2,
        ..config("unique-level", dir.path())
    };
    let handler = Arc::new(RecordingHandler::new());
    let handle = create(QueueKind::UniqueLevel, &config, handler.clone()).await;
    let unique = handle.unique().unwrap().clone();

    unique.push_func("A".to_string(), None).await.unwrap();
    unique.push_func("B".to_string(), None).await.unwrap();
    let err = unique.push_func("A".to_string(), None).await.unwrap_err();
    assert!(err.is_already_in_queue());

    handle.lifecycle().run().await.unwrap();
    assert!(handler.wait_for_items(2, Duration::from_secs(10)).await);
    assert_eq!(
        handler.batches(),
        vec![vec!["A".to_string(), "B".to_string()]]
    );

    // dequeued, so the identity is free again
    assert!(!unique.has(&"A".to_string()).await.unwrap());
    unique.push_func("A".to_string(), None).await.unwrap();
    assert!(handler.wait_for_items(3, Duration::from_secs(10)).await);
    handle.lifecycle().terminate().await;
}

/// Membership of a unique disk queue is itself durable
#[tokio::test]
async fn test_unique_membership_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("dedup", dir.path());

    {
        let handler = Arc::new(RecordingHandler::new());
        let handle = create(QueueKind::UniqueLevel, &config, handler).await;
        handle.push("A".to_string()).await.unwrap();
        handle.lifecycle().terminate().await;
    }

    let handler = Arc::new(RecordingHandler::new());
    let handle = create(QueueKind::UniqueLevel, &config, handler.clone()).await;
    let unique = handle.unique().unwrap();
    assert!(unique.has(&"A".to_string()).await.unwrap());
    assert!(handle.push("A".to_string()).await.unwrap_err().is_already_in_queue());

    handle.lifecycle().run().await.unwrap();
    assert!(handler.wait_for_items(1, Duration::from_secs(10)).await);
    assert_eq!(handler.items(), vec!["A".to_string()]);
    handle.lifecycle().terminate().await;
}

/// A unique hybrid queue refuses items still pending in its backlog store
#[tokio::test]
async fn test_unique_persistable_checks_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("hybrid-dedup", dir.path());

    {
        let handler = Arc::new(RecordingHandler::new());
        let handle = create(QueueKind::UniquePersistableChannel, &config, handler).await;
        handle.push("A".to_string()).await.unwrap();
        handle.lifecycle().terminate().await;
    }

    let handler = Arc::new(RecordingHandler::new());
    let handle = create(QueueKind::UniquePersistableChannel, &config, handler.clone()).await;
    assert!(handle.push("A".to_string()).await.unwrap_err().is_already_in_queue());
    handle.push("B".to_string()).await.unwrap();

    handle.lifecycle().run().await.unwrap();
    assert!(handler.wait_for_items(2, Duration::from_secs(10)).await);
    let mut items = handler.items();
    items.sort();
    assert_eq!(items, vec!["A".to_string(), "B".to_string()]);
    handle.lifecycle().terminate().await;
}
