//! Redis Integration Tests
//!
//! Run only when SPOOL_TEST_REDIS_URL points at a disposable server,
//! e.g. SPOOL_TEST_REDIS_URL=redis://127.0.0.1:6379/15

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use spool_core::application::{Lifecycle, QueueManager, UniqueQueue};
use spool_core::domain::{QueueConfig, QueueKind};
use spool_core::port::handler::mocks::RecordingHandler;
use spool_daemon::QueueFactory;

fn redis_config(name: &str) -> Option<QueueConfig> {
    let url = std::env::var("SPOOL_TEST_REDIS_URL").ok()?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    Some(QueueConfig {
        connection_string: Some(url),
        queue_key: Some(format!("spool-it-{}-{}", name, nanos)),
        batch_length: 2,
        ..QueueConfig::new(name)
    })
}

#[tokio::test]
async fn test_redis_queue_delivers_in_batches() {
    let Some(config) = redis_config("remote") else { return };
    let handler = Arc::new(RecordingHandler::<String>::new());
    let handle = QueueFactory::new(Arc::new(QueueManager::new()))
        .create::<String>(QueueKind::Redis, &config, handler.clone())
        .await
        .unwrap();

    handle.push("A".to_string()).await.unwrap();
    handle.push("B".to_string()).await.unwrap();
    handle.lifecycle().run().await.unwrap();

    assert!(handler.wait_for_items(2, Duration::from_secs(10)).await);
    assert_eq!(handler.items(), vec!["A".to_string(), "B".to_string()]);
    handle.lifecycle().terminate().await;
}

#[tokio::test]
async fn test_unique_redis_queue_rejects_duplicates() {
    let Some(config) = redis_config("remote-unique") else { return };
    let handler = Arc::new(RecordingHandler::<String>::new());
    let handle = QueueFactory::new(Arc::new(QueueManager::new()))
        .create::<String>(QueueKind::UniqueRedis, &config, handler.clone())
        .await
        .unwrap();
    let unique = handle.unique().unwrap();

    unique.push_func("A".to_string(), None).await.unwrap();
    assert!(unique.has(&"A".to_string()).await.unwrap());
    assert!(unique
        .push_func("A".to_string(), None)
        .await
        .unwrap_err()
        .is_already_in_queue());

    handle.lifecycle().run().await.unwrap();
    assert!(handler.wait_for_items(1, Duration::from_secs(10)).await);
    assert!(!unique.has(&"A".to_string()).await.unwrap());
    handle.lifecycle().terminate().await;
}
