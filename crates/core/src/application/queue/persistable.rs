// Persistable (hybrid) Queue
// In-memory fast path; whatever is still buffered at shutdown goes to the store

use super::channel::ChannelQueue;
use super::fifo::FifoQueue;
use super::unique::MembershipSet;
use super::{delegate_managed, start_state, Lifecycle, ManagedQueue, Queue, UniqueQueue};
use crate::application::worker::constants::{
    BACKLOG_BLOCK_TIMEOUT, BACKLOG_BOOST_TIMEOUT, BACKLOG_BOOST_WORKERS, BACKLOG_MAX_WORKERS,
    BACKLOG_WORKERS,
};
use crate::application::worker::PoolStatus;
use crate::domain::{encode, Item, PoolTuning, QueueConfig, QueueKind, QueueState, StateCell};
use crate::error::{QueueError, Result};
use crate::port::{BatchHandler, ByteFifo, Precommit, UniqueByteFifo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub struct PersistableQueue<T, S: ?Sized> {
    name: String,
    kind: QueueKind,
    state: StateCell,
    /// Held shared by pushes, exclusively while switching to shutdown
    gate: RwLock<()>,
    fast: ChannelQueue<T>,
    backlog: FifoQueue<T, S>,
}

impl<T, S> PersistableQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    pub fn new(config: &QueueConfig, store: Arc<S>, handler: Arc<dyn BatchHandler<T>>) -> Result<Self> {
        Self::build(QueueKind::PersistableChannel, config, store, handler, None)
    }

    fn build(
        kind: QueueKind,
        config: &QueueConfig,
        store: Arc<S>,
        handler: Arc<dyn BatchHandler<T>>,
        members: Option<Arc<MembershipSet>>,
    ) -> Result<Self> {
        config.validate()?;
        let fast_kind = if members.is_some() {
            QueueKind::UniqueChannel
        } else {
            QueueKind::Channel
        };
        let fast = ChannelQueue::build(fast_kind, config.pool_config(), Arc::clone(&handler), members);

        let backlog_config = QueueConfig {
            workers: BACKLOG_WORKERS,
            max_workers: BACKLOG_MAX_WORKERS,
            boost_workers: BACKLOG_BOOST_WORKERS,
            boost_timeout: BACKLOG_BOOST_TIMEOUT,
            block_timeout: BACKLOG_BLOCK_TIMEOUT,
            ..config.clone()
        };
        let backlog = FifoQueue::new(QueueKind::Level, &backlog_config, store, handler)?;

        Ok(Self {
            name: config.name.clone(),
            kind,
            state: StateCell::new(),
            gate: RwLock::new(()),
            fast,
            backlog,
        })
    }

    /// Fast path while running; straight to the store once shutdown began
    async fn push_routed(&self, item: T, precommit: Option<Precommit>) -> Result<()> {
        let _gate = self.gate.read().await;
        if self.state.is_terminated() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        if self.state.is_closed() {
            return self.backlog.push_with(&item, precommit).await;
        }
        self.fast.push_unique(item, precommit).await
    }

    async fn redirect(&self, items: Vec<T>) {
        let count = items.len();
        for item in &items {
            match self.backlog.push_with(item, None).await {
                Ok(()) => {}
                Err(QueueError::AlreadyInQueue) => {
                    debug!(queue = %self.name, "Redirected item already in store");
                }
                Err(e) => {
                    error!(queue = %self.name, error = %e, "Failed to redirect item to store; item lost");
                }
            }
        }
        if count > 0 {
            debug!(queue = %self.name, count, "Redirected buffered items to store");
        }
    }
}

#[async_trait]
impl<T, S> Lifecycle for PersistableQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        start_state(&self.state, &self.name)?;
        self.fast.run().await?;
        self.backlog.run().await?;
        info!(queue = %self.name, kind = %self.kind, "Queue running");
        Ok(())
    }

    async fn shutdown(&self) {
        {
            let _gate = self.gate.write().await;
            if !self.state.begin_shutdown() {
                return;
            }
        }
        info!(queue = %self.name, "Queue shutting down");

        let leftovers = self.fast.close_and_drain().await;
        self.redirect(leftovers).await;
        self.backlog.shutdown().await;
    }

    async fn terminate(&self) {
        self.shutdown().await;
        if !self.state.terminate() {
            return;
        }
        self.fast.terminate().await;
        self.backlog.terminate().await;
        info!(queue = %self.name, "Queue terminated");
    }
}

#[async_trait]
impl<T, S> ManagedQueue for PersistableQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn state(&self) -> QueueState {
        self.state.get()
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let exceeded = |_: QueueError| QueueError::DeadlineExceeded(timeout);

        self.fast.flush(timeout).await.map_err(exceeded)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.backlog.flush(remaining).await.map_err(exceeded)
    }

    async fn is_empty(&self) -> bool {
        self.fast.is_empty().await && self.backlog.is_empty().await
    }

    fn pool_status(&self) -> PoolStatus {
        self.fast.pool_status()
    }

    fn set_pool_settings(&self, tuning: PoolTuning) -> Result<()> {
        self.fast.set_pool_settings(tuning)
    }
}

#[async_trait]
impl<T, S> Queue<T> for PersistableQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    async fn push(&self, item: T) -> Result<()> {
        self.push_routed(item, None).await
    }
}

/// Hybrid queue whose identities are unique across the fast path and the store
pub struct UniquePersistableQueue<T>(PersistableQueue<T, dyn UniqueByteFifo>);

impl<T: Item> UniquePersistableQueue<T> {
    pub fn new(
        config: &QueueConfig,
        store: Arc<dyn UniqueByteFifo>,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Result<Self> {
        PersistableQueue::build(
            QueueKind::UniquePersistableChannel,
            config,
            store,
            handler,
            Some(Arc::new(MembershipSet::new())),
        )
        .map(Self)
    }

    fn store(&self) -> &Arc<dyn UniqueByteFifo> {
        self.0.backlog.store()
    }
}

delegate_managed!(UniquePersistableQueue);

#[async_trait]
impl<T: Item> Queue<T> for UniquePersistableQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        self.push_func(item, None).await
    }
}

#[async_trait]
impl<T: Item> UniqueQueue<T> for UniquePersistableQueue<T> {
    async fn push_func(&self, item: T, precommit: Option<Precommit>) -> Result<()> {
        // still pending in the backlog from an earlier run
        if self.store().has(&encode(&item)?).await? {
            debug!(queue = %self.0.name, "Item already in store backlog");
            return Err(QueueError::AlreadyInQueue);
        }
        self.0.push_routed(item, precommit).await
    }

    async fn has(&self, item: &T) -> Result<bool> {
        let identity = encode(item)?;
        let in_fast = self
            .0
            .fast
            .members()
            .map(|members| members.contains(&identity))
            .unwrap_or(false);
        if in_fast {
            return Ok(true);
        }
        self.store().has(&identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::byte_fifo::mocks::MemoryByteFifo;
    use crate::port::handler::mocks::RecordingHandler;

    fn config() -> QueueConfig {
        QueueConfig {
            batch_length: 2,
            ..QueueConfig::new("hybrid")
        }
    }

    fn decoded(store: &MemoryByteFifo) -> Vec<String> {
        store
            .entries()
            .iter()
            .map(|data| serde_json::from_slice(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_fast_path_handles_items_without_touching_store() {
        let store = Arc::new(MemoryByteFifo::new("hybrid"));
        let handler = Arc::new(RecordingHandler::<String>::new());
        let queue = PersistableQueue::new(&config(), store.clone(), handler.clone()).unwrap();

        queue.run().await.unwrap();
        queue.push("A".to_string()).await.unwrap();
        queue.push("B".to_string()).await.unwrap();
        queue.flush(Duration::from_secs(3)).await.unwrap();

        assert_eq!(handler.item_count(), 2);
        assert!(store.entries().is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_few_items_reach_handler_with_several_workers_running() {
        let store = Arc::new(MemoryByteFifo::new("hybrid"));
        let handler = Arc::new(RecordingHandler::<String>::new());
        let config = QueueConfig {
            workers: 3,
            batch_length: 20,
            ..QueueConfig::new("hybrid")
        };
        let queue = PersistableQueue::new(&config, store, handler.clone()).unwrap();
        queue.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.push("A".to_string()).await.unwrap();
        queue.push("B".to_string()).await.unwrap();
        assert!(handler.wait_for_items(2, Duration::from_secs(1)).await);
        queue.flush(Duration::from_secs(1)).await.unwrap();
        queue.terminate().await;
    }

    #[tokio::test]
    async fn test_shutdown_redirects_buffer_to_store() {
        let store = Arc::new(MemoryByteFifo::new("hybrid"));
        let handler = Arc::new(RecordingHandler::<String>::new());
        let queue = PersistableQueue::new(&config(), store.clone(), handler.clone()).unwrap();

        for i in 0..10 {
            queue.push(format!("item-{}", i)).await.unwrap();
        }
        queue.shutdown().await;

        let expected: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
        assert_eq!(decoded(&store), expected);
        assert_eq!(handler.item_count(), 0);

        // after shutdown pushes land in the store
        queue.push("late".to_string()).await.unwrap();
        assert_eq!(store.entries().len(), 11);

        queue.terminate().await;
        assert!(store.is_closed());
        assert!(matches!(
            queue.push("too late".to_string()).await,
            Err(QueueError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_run_drains_existing_backlog() {
        let store = Arc::new(MemoryByteFifo::new("hybrid"));
        store.push(b"\"old-1\"").await.unwrap();
        store.push(b"\"old-2\"").await.unwrap();

        let handler = Arc::new(RecordingHandler::<String>::new());
        let queue = PersistableQueue::new(&config(), store.clone(), handler.clone()).unwrap();
        queue.run().await.unwrap();

        assert!(handler.wait_for_items(2, Duration::from_secs(3)).await);
        let mut items = handler.items();
        items.sort();
        assert_eq!(items, vec!["old-1".to_string(), "old-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unique_rejects_item_pending_in_store() {
        let store = Arc::new(MemoryByteFifo::new_unique("hybrid"));
        store.push(b"\"A\"").await.unwrap();

        let handler = Arc::new(RecordingHandler::<String>::new());
        let queue = UniquePersistableQueue::new(&config(), store.clone(), handler).unwrap();

        assert!(queue.has(&"A".to_string()).await.unwrap());
        let err = queue.push("A".to_string()).await.unwrap_err();
        assert!(err.is_already_in_queue());

        queue.push("B".to_string()).await.unwrap();
        assert!(queue.has(&"B".to_string()).await.unwrap());
        assert!(queue.push("B".to_string()).await.unwrap_err().is_already_in_queue());
    }

    #[tokio::test]
    async fn test_unique_redirect_keeps_identities_in_store_set() {
        let store = Arc::new(MemoryByteFifo::new_unique("hybrid"));
        let handler = Arc::new(RecordingHandler::<String>::new());
        let queue = UniquePersistableQueue::new(&config(), store.clone(), handler).unwrap();

        queue.push("A".to_string()).await.unwrap();
        queue.shutdown().await;

        assert!(store.has(b"\"A\"").await.unwrap());
        assert!(queue.has(&"A".to_string()).await.unwrap());
        assert!(queue.push("A".to_string()).await.unwrap_err().is_already_in_queue());
        assert_eq!(queue.kind(), QueueKind::UniquePersistableChannel);
    }
}
