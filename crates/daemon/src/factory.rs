// Queue Factory
// Maps a QueueKind to its concrete queue and store, then registers the result

use futures::FutureExt;
use spool_core::application::{
    ChannelQueue, FifoQueue, PersistableQueue, QueueConstructor, QueueHandle, QueueManager,
    ShutdownCoordinator, UniqueChannelQueue, UniquePersistableQueue, WrappedQueue,
};
use spool_core::domain::{Item, QueueConfig, QueueKind};
use spool_core::error::{QueueError, Result};
use spool_core::port::{BatchHandler, ByteFifo, UniqueByteFifo};
use spool_infra_redis::{RedisByteFifo, RedisUniqueByteFifo};
use spool_infra_sqlite::{SqliteByteFifo, SqliteUniqueByteFifo};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds queues of any kind and registers them with the manager
/// (and, when attached, the shutdown coordinator)
pub struct QueueFactory {
    manager: Arc<QueueManager>,
    coordinator: Option<Arc<ShutdownCoordinator>>,
}

impl QueueFactory {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            manager,
            coordinator: None,
        }
    }

    /// Subscribe every created queue to `coordinator`
    pub fn with_coordinator(mut self, coordinator: Arc<ShutdownCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    /// Construct, register and return a queue. The queue is not run.
    ///
    /// When the backend cannot be built for a reason other than its
    /// configuration and `wrap_if_necessary` is set, a wrapped queue is
    /// returned instead; it keeps retrying the construction after `run`.
    pub async fn create<T: Item>(
        &self,
        kind: QueueKind,
        config: &QueueConfig,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Result<QueueHandle<T>> {
        config.validate_for(kind)?;
        // refuse before any store is opened
        if self.manager.get(&config.name).is_some() {
            return Err(QueueError::Conflict(format!(
                "queue '{}' is already registered",
                config.name
            )));
        }

        let handle = match build_queue(kind, config, Arc::clone(&handler)).await {
            Ok(handle) => handle,
            Err(e) if config.wrap_if_necessary && !kind.is_unique() && !e.is_invalid_configuration() => {
                warn!(queue = %config.name, kind = %kind, error = %e, "Queue unavailable; wrapping until it can be built");
                let wrapped = WrappedQueue::new(kind, config, constructor(kind, config, handler))?;
                QueueHandle::new(Arc::new(wrapped))
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .manager
            .add::<T>(kind, config, Arc::clone(handle.managed()))
        {
            // lost a registration race; release the store we opened
            handle.lifecycle().terminate().await;
            return Err(e);
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.subscribe(Arc::clone(handle.lifecycle()));
        }
        info!(queue = %config.name, kind = %handle.kind(), "Queue created");
        Ok(handle)
    }
}

/// Retryable construction of a non-unique queue for the wrapped fallback
fn constructor<T: Item>(
    kind: QueueKind,
    config: &QueueConfig,
    handler: Arc<dyn BatchHandler<T>>,
) -> QueueConstructor<T> {
    let config = config.clone();
    Box::new(move || {
        let config = config.clone();
        let handler = Arc::clone(&handler);
        async move {
            build_queue(kind, &config, handler)
                .await
                .map(|handle| Arc::clone(handle.queue()))
        }
        .boxed()
    })
}

async fn build_queue<T: Item>(
    kind: QueueKind,
    config: &QueueConfig,
    handler: Arc<dyn BatchHandler<T>>,
) -> Result<QueueHandle<T>> {
    let handle = match kind {
        QueueKind::Channel => QueueHandle::new(Arc::new(ChannelQueue::new(config, handler)?)),
        QueueKind::UniqueChannel => {
            QueueHandle::new_unique(Arc::new(UniqueChannelQueue::new(config, handler)?))
        }
        QueueKind::Level => {
            let store = open_local(config).await?;
            QueueHandle::new(Arc::new(FifoQueue::new(kind, config, store, handler)?))
        }
        QueueKind::UniqueLevel => {
            let store = open_local_unique(config).await?;
            QueueHandle::new_unique(Arc::new(FifoQueue::new(kind, config, store, handler)?))
        }
        QueueKind::Redis => {
            let store = connect_remote(config).await?;
            QueueHandle::new(Arc::new(FifoQueue::new(kind, config, store, handler)?))
        }
        QueueKind::UniqueRedis => {
            let store = connect_remote_unique(config).await?;
            QueueHandle::new_unique(Arc::new(FifoQueue::new(kind, config, store, handler)?))
        }
        QueueKind::PersistableChannel => {
            let store = open_local(config).await?;
            QueueHandle::new(Arc::new(PersistableQueue::new(config, store, handler)?))
        }
        QueueKind::UniquePersistableChannel => {
            let store = open_local_unique(config).await?;
            QueueHandle::new_unique(Arc::new(UniquePersistableQueue::new(config, store, handler)?))
        }
    };
    Ok(handle)
}

async fn open_local(config: &QueueConfig) -> Result<Arc<dyn ByteFifo>> {
    let store = SqliteByteFifo::open(config.data_dir(), &config.queue_key()).await?;
    Ok(Arc::new(store))
}

async fn open_local_unique(config: &QueueConfig) -> Result<Arc<dyn UniqueByteFifo>> {
    let store =
        SqliteUniqueByteFifo::open(config.data_dir(), &config.queue_key(), &config.set_key()).await?;
    Ok(Arc::new(store))
}

async fn connect_remote(config: &QueueConfig) -> Result<Arc<dyn ByteFifo>> {
    let conn = config.connection_string.as_deref().unwrap_or_default();
    let store = RedisByteFifo::connect(conn, &config.queue_key()).await?;
    Ok(Arc::new(store))
}

async fn connect_remote_unique(config: &QueueConfig) -> Result<Arc<dyn UniqueByteFifo>> {
    let conn = config.connection_string.as_deref().unwrap_or_default();
    let store = RedisUniqueByteFifo::connect(conn, &config.queue_key(), &config.set_key()).await?;
    Ok(Arc::new(store))
}
