// Queue Manager - registry of every constructed queue

use crate::application::queue::ManagedQueue;
use crate::application::worker::PoolStatus;
use crate::domain::{PoolTuning, QueueConfig, QueueKind, QueueState};
use crate::error::{QueueError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::application::worker::constants::FLUSH_POLL_INTERVAL;

struct ManagedEntry {
    kind: QueueKind,
    config: QueueConfig,
    exemplar: &'static str,
    queue: Arc<dyn ManagedQueue>,
}

/// Diagnostic view of one registered queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueDescriptor {
    pub name: String,
    pub kind: QueueKind,
    pub state: QueueState,
    /// Type name of the items the queue carries
    pub exemplar: &'static str,
    pub config: QueueConfig,
    pub pool: PoolStatus,
}

/// Registry of active queues, keyed by name.
///
/// Queues are registered once and never removed.
#[derive(Default)]
pub struct QueueManager {
    queues: RwLock<BTreeMap<String, ManagedEntry>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue carrying items of type `T`
    pub fn add<T>(&self, kind: QueueKind, config: &QueueConfig, queue: Arc<dyn ManagedQueue>) -> Result<()> {
        let name = queue.name().to_string();
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&name) {
            return Err(QueueError::Conflict(format!(
                "queue '{}' is already registered",
                name
            )));
        }
        queues.insert(
            name.clone(),
            ManagedEntry {
                kind,
                config: config.clone(),
                exemplar: std::any::type_name::<T>(),
                queue,
            },
        );
        info!(queue = %name, kind = %kind, "Queue registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedQueue>> {
        self.read().get(name).map(|entry| Arc::clone(&entry.queue))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn descriptors(&self) -> Vec<QueueDescriptor> {
        self.read()
            .iter()
            .map(|(name, entry)| QueueDescriptor {
                name: name.clone(),
                kind: entry.kind,
                state: entry.queue.state(),
                exemplar: entry.exemplar,
                config: entry.config.clone(),
                pool: entry.queue.pool_status(),
            })
            .collect()
    }

    /// Flush every queue until all are empty at once, or the deadline passes
    pub async fn flush_all(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let queues: Vec<Arc<dyn ManagedQueue>> =
                self.read().values().map(|e| Arc::clone(&e.queue)).collect();

            let mut all_empty = true;
            for queue in &queues {
                if queue.is_empty().await {
                    continue;
                }
                all_empty = false;
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(QueueError::DeadlineExceeded(timeout));
                }
                if let Err(e) = queue.flush(remaining).await {
                    debug!(queue = %queue.name(), error = %e, "Flush incomplete");
                }
            }
            if all_empty {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(QueueError::DeadlineExceeded(timeout));
            }
            sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    pub fn set_pool_settings(&self, name: &str, tuning: PoolTuning) -> Result<()> {
        let queue = self
            .get(name)
            .ok_or_else(|| QueueError::NotFound(format!("queue '{}'", name)))?;
        queue.set_pool_settings(tuning)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ManagedEntry>> {
        self.queues.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::{ChannelQueue, Lifecycle, Queue};
    use crate::port::handler::mocks::RecordingHandler;

    fn channel(name: &str, handler: Arc<RecordingHandler<String>>) -> Arc<ChannelQueue<String>> {
        Arc::new(ChannelQueue::new(&QueueConfig::new(name), handler).unwrap())
    }

    #[tokio::test]
    async fn test_register_and_describe() {
        let manager = QueueManager::new();
        let handler = Arc::new(RecordingHandler::new());
        let queue = channel("mail", handler);

        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("mail"), queue.clone())
            .unwrap();

        assert_eq!(manager.names(), vec!["mail".to_string()]);
        assert!(manager.get("mail").is_some());
        assert!(manager.get("other").is_none());

        let descriptors = manager.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].kind, QueueKind::Channel);
        assert_eq!(descriptors[0].state, QueueState::Created);
        assert!(descriptors[0].exemplar.contains("String"));
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let manager = QueueManager::new();
        let handler = Arc::new(RecordingHandler::new());
        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("dup"), channel("dup", handler.clone()))
            .unwrap();

        let err = manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("dup"), channel("dup", handler))
            .unwrap_err();
        assert!(matches!(err, QueueError::Conflict(_)));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_all_waits_for_every_queue() {
        let manager = QueueManager::new();
        let handler = Arc::new(RecordingHandler::new());
        let first = channel("first", handler.clone());
        let second = channel("second", handler.clone());
        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("first"), first.clone())
            .unwrap();
        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("second"), second.clone())
            .unwrap();

        first.run().await.unwrap();
        second.run().await.unwrap();
        first.push("a".to_string()).await.unwrap();
        second.push("b".to_string()).await.unwrap();

        manager.flush_all(Duration::from_secs(3)).await.unwrap();
        assert_eq!(handler.item_count(), 2);
    }

    #[tokio::test]
    async fn test_flush_all_deadline() {
        let manager = QueueManager::new();
        let handler = Arc::new(RecordingHandler::new().gated());
        let queue = channel("stuck", handler.clone());
        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("stuck"), queue.clone())
            .unwrap();
        queue.run().await.unwrap();
        queue.push("x".to_string()).await.unwrap();

        let err = manager.flush_all(Duration::from_millis(200)).await.unwrap_err();
        assert!(err.is_deadline_exceeded());
        handler.open_gate();
    }

    #[tokio::test]
    async fn test_set_pool_settings_by_name() {
        let manager = QueueManager::new();
        let handler = Arc::new(RecordingHandler::new());
        manager
            .add::<String>(QueueKind::Channel, &QueueConfig::new("tuned"), channel("tuned", handler))
            .unwrap();

        manager
            .set_pool_settings(
                "tuned",
                PoolTuning {
                    max_workers: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(manager.descriptors()[0].pool.max_workers, 3);

        let err = manager
            .set_pool_settings("missing", PoolTuning::default())
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}
