// In-memory Queue
// A worker pool over a bounded buffer; nothing survives a restart

use super::unique::MembershipSet;
use super::{delegate_managed, start_state, Lifecycle, ManagedQueue, Queue, UniqueQueue};
use crate::application::worker::{PoolStatus, WorkerPool};
use crate::domain::{encode, Item, PoolConfig, PoolTuning, QueueConfig, QueueKind, QueueState, StateCell};
use crate::error::{QueueError, Result};
use crate::port::{BatchHandler, Precommit};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ChannelQueue<T> {
    name: String,
    kind: QueueKind,
    state: StateCell,
    pool: WorkerPool<T>,
    members: Option<Arc<MembershipSet>>,
}

impl<T: Item> ChannelQueue<T> {
    pub fn new(config: &QueueConfig, handler: Arc<dyn BatchHandler<T>>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            QueueKind::Channel,
            config.pool_config(),
            handler,
            None,
        ))
    }

    pub(crate) fn build(
        kind: QueueKind,
        pool_config: PoolConfig,
        handler: Arc<dyn BatchHandler<T>>,
        members: Option<Arc<MembershipSet>>,
    ) -> Self {
        let name = pool_config.name.clone();
        let pool = match &members {
            Some(members) => {
                let members = Arc::clone(members);
                WorkerPool::with_dequeue_hook(
                    pool_config,
                    handler,
                    Arc::new(move |item: &T| {
                        if let Ok(identity) = encode(item) {
                            members.remove(&identity);
                        }
                    }),
                )
            }
            None => WorkerPool::new(pool_config, handler),
        };
        Self {
            name,
            kind,
            state: StateCell::new(),
            pool,
            members,
        }
    }

    pub(crate) fn members(&self) -> Option<&MembershipSet> {
        self.members.as_deref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Unique push: claim the identity, run the precommit, enqueue.
    ///
    /// The identity is released again if anything after the claim fails.
    pub(crate) async fn push_unique(&self, item: T, precommit: Option<Precommit>) -> Result<()> {
        self.ensure_open()?;
        let Some(members) = &self.members else {
            if let Some(precommit) = precommit {
                precommit()?;
            }
            return self.pool.push(item).await;
        };

        let identity = encode(&item)?;
        if !members.insert(&identity) {
            debug!(queue = %self.name, "Item already in queue");
            return Err(QueueError::AlreadyInQueue);
        }

        let result = match precommit {
            Some(precommit) => precommit(),
            None => Ok(()),
        };
        let result = match result {
            Ok(()) => self.pool.push(item).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            members.remove(&identity);
        }
        result
    }

    /// Stop the workers and hand back whatever is still buffered
    pub(crate) async fn close_and_drain(&self) -> Vec<T> {
        self.state.begin_shutdown();
        self.pool.cancel();
        self.pool.wait().await;
        self.pool.drain_buffered().await
    }
}

#[async_trait]
impl<T: Item> Lifecycle for ChannelQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        start_state(&self.state, &self.name)?;
        self.pool.start();
        info!(queue = %self.name, kind = %self.kind, "Queue running");
        Ok(())
    }

    async fn shutdown(&self) {
        if self.state.begin_shutdown() {
            // workers keep draining the buffer until terminate
            info!(queue = %self.name, "Queue shutting down");
        }
    }

    async fn terminate(&self) {
        self.shutdown().await;
        if !self.state.terminate() {
            return;
        }
        self.pool.cancel();
        self.pool.wait().await;
        let dropped = self.pool.drain_buffered().await;
        if !dropped.is_empty() {
            warn!(
                queue = %self.name,
                count = dropped.len(),
                "Queue terminated with unhandled items; dropping them"
            );
        }
        info!(queue = %self.name, "Queue terminated");
    }
}

#[async_trait]
impl<T: Item> ManagedQueue for ChannelQueue<T> {
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn state(&self) -> QueueState {
        self.state.get()
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        self.pool.flush(timeout).await
    }

    async fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    fn set_pool_settings(&self, tuning: PoolTuning) -> Result<()> {
        self.pool.set_settings(tuning)
    }
}

#[async_trait]
impl<T: Item> Queue<T> for ChannelQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        if self.members.is_some() {
            return self.push_unique(item, None).await;
        }
        self.ensure_open()?;
        self.pool.push(item).await
    }
}

/// In-memory queue with an in-memory membership set
pub struct UniqueChannelQueue<T>(ChannelQueue<T>);

impl<T: Item> UniqueChannelQueue<T> {
    pub fn new(config: &QueueConfig, handler: Arc<dyn BatchHandler<T>>) -> Result<Self> {
        config.validate()?;
        Ok(Self(ChannelQueue::build(
            QueueKind::UniqueChannel,
            config.pool_config(),
            handler,
            Some(Arc::new(MembershipSet::new())),
        )))
    }
}

delegate_managed!(UniqueChannelQueue);

#[async_trait]
impl<T: Item> Queue<T> for UniqueChannelQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        self.0.push_unique(item, None).await
    }
}

#[async_trait]
impl<T: Item> UniqueQueue<T> for UniqueChannelQueue<T> {
    async fn push_func(&self, item: T, precommit: Option<Precommit>) -> Result<()> {
        self.0.push_unique(item, precommit).await
    }

    async fn has(&self, item: &T) -> Result<bool> {
        let identity = encode(item)?;
        Ok(self
            .0
            .members()
            .map(|members| members.contains(&identity))
            .unwrap_or(false))
    }
}
