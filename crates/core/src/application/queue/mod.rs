// Queue Variants - worker pool and backing store compositions

mod channel;
mod fifo;
mod persistable;
mod unique;
mod wrapped;

pub use channel::{ChannelQueue, UniqueChannelQueue};
pub use fifo::{FifoQueue, UniqueFifoQueue};
pub use persistable::{PersistableQueue, UniquePersistableQueue};
pub use unique::MembershipSet;
pub use wrapped::{QueueConstructor, WrappedQueue};

use crate::application::worker::PoolStatus;
use crate::domain::{Item, PoolTuning, QueueKind, QueueState, StateCell};
use crate::error::{QueueError, Result};
use crate::port::Precommit;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Run / shutdown / terminate hooks driven by the shutdown coordinator
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;

    /// Created -> Running; any other state is an error
    async fn run(&self) -> Result<()>;

    /// Stop the fast path; idempotent
    async fn shutdown(&self);

    /// Shut down if needed, then release the backing store; idempotent
    async fn terminate(&self);
}

/// The item-type independent view of a queue
#[async_trait]
pub trait ManagedQueue: Lifecycle {
    fn kind(&self) -> QueueKind;

    fn state(&self) -> QueueState;

    /// Block until nothing accepted is left unhandled, or `timeout` elapses
    async fn flush(&self, timeout: Duration) -> Result<()>;

    async fn is_empty(&self) -> bool;

    fn pool_status(&self) -> PoolStatus;

    fn set_pool_settings(&self, tuning: PoolTuning) -> Result<()>;
}

#[async_trait]
pub trait Queue<T: Item>: ManagedQueue {
    async fn push(&self, item: T) -> Result<()>;
}

/// A queue holding at most one pending item per identity
#[async_trait]
pub trait UniqueQueue<T: Item>: Queue<T> {
    /// Enqueue unless an equal item is pending; `precommit` runs only when
    /// the item is actually going to be enqueued
    async fn push_func(&self, item: T, precommit: Option<Precommit>) -> Result<()>;

    async fn has(&self, item: &T) -> Result<bool>;
}

/// A constructed queue with every view its owner needs
pub struct QueueHandle<T: Item> {
    queue: Arc<dyn Queue<T>>,
    unique: Option<Arc<dyn UniqueQueue<T>>>,
    managed: Arc<dyn ManagedQueue>,
    lifecycle: Arc<dyn Lifecycle>,
}

impl<T: Item> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            unique: self.unique.clone(),
            managed: Arc::clone(&self.managed),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<T: Item> QueueHandle<T> {
    pub fn new<Q: Queue<T> + 'static>(queue: Arc<Q>) -> Self {
        Self {
            queue: queue.clone(),
            unique: None,
            managed: queue.clone(),
            lifecycle: queue,
        }
    }

    pub fn new_unique<Q: UniqueQueue<T> + 'static>(queue: Arc<Q>) -> Self {
        Self {
            queue: queue.clone(),
            unique: Some(queue.clone()),
            managed: queue.clone(),
            lifecycle: queue,
        }
    }

    pub fn name(&self) -> &str {
        self.managed.name()
    }

    pub fn kind(&self) -> QueueKind {
        self.managed.kind()
    }

    pub fn is_unique(&self) -> bool {
        self.unique.is_some()
    }

    pub fn queue(&self) -> &Arc<dyn Queue<T>> {
        &self.queue
    }

    pub fn unique(&self) -> Option<&Arc<dyn UniqueQueue<T>>> {
        self.unique.as_ref()
    }

    pub fn managed(&self) -> &Arc<dyn ManagedQueue> {
        &self.managed
    }

    pub fn lifecycle(&self) -> &Arc<dyn Lifecycle> {
        &self.lifecycle
    }

    pub async fn push(&self, item: T) -> Result<()> {
        self.queue.push(item).await
    }
}

/// Created -> Running, reported as `InvalidState`
pub(crate) fn start_state(state: &StateCell, name: &str) -> Result<()> {
    state
        .start()
        .map_err(|e| QueueError::InvalidState(format!("queue '{}': {}", name, e)))
}

/// Implement `Lifecycle` and `ManagedQueue` for a newtype by forwarding to
/// its single field
macro_rules! delegate_managed {
    ($wrapper:ident) => {
        #[async_trait::async_trait]
        impl<T: $crate::domain::Item> $crate::application::queue::Lifecycle for $wrapper<T> {
            fn name(&self) -> &str {
                $crate::application::queue::Lifecycle::name(&self.0)
            }

            async fn run(&self) -> $crate::error::Result<()> {
                $crate::application::queue::Lifecycle::run(&self.0).await
            }

            async fn shutdown(&self) {
                $crate::application::queue::Lifecycle::shutdown(&self.0).await
            }

            async fn terminate(&self) {
                $crate::application::queue::Lifecycle::terminate(&self.0).await
            }
        }

        #[async_trait::async_trait]
        impl<T: $crate::domain::Item> $crate::application::queue::ManagedQueue for $wrapper<T> {
            fn kind(&self) -> $crate::domain::QueueKind {
                $crate::application::queue::ManagedQueue::kind(&self.0)
            }

            fn state(&self) -> $crate::domain::QueueState {
                $crate::application::queue::ManagedQueue::state(&self.0)
            }

            async fn flush(&self, timeout: std::time::Duration) -> $crate::error::Result<()> {
                $crate::application::queue::ManagedQueue::flush(&self.0, timeout).await
            }

            async fn is_empty(&self) -> bool {
                $crate::application::queue::ManagedQueue::is_empty(&self.0).await
            }

            fn pool_status(&self) -> $crate::application::worker::PoolStatus {
                $crate::application::queue::ManagedQueue::pool_status(&self.0)
            }

            fn set_pool_settings(
                &self,
                tuning: $crate::domain::PoolTuning,
            ) -> $crate::error::Result<()> {
                $crate::application::queue::ManagedQueue::set_pool_settings(&self.0, tuning)
            }
        }
    };
}
pub(crate) use delegate_managed;
