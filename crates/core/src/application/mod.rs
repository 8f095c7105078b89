// Application Layer - Queues, worker pool, registry and shutdown coordination

pub mod lifecycle;
pub mod manager;
pub mod queue;
pub mod worker;

// Re-exports
pub use lifecycle::ShutdownCoordinator;
pub use manager::{QueueDescriptor, QueueManager};
pub use queue::{
    ChannelQueue, FifoQueue, Lifecycle, ManagedQueue, PersistableQueue, Queue, QueueConstructor,
    QueueHandle, UniqueChannelQueue, UniqueFifoQueue, UniquePersistableQueue, UniqueQueue,
    WrappedQueue,
};
pub use worker::{shutdown_channel, PoolStatus, ShutdownSender, ShutdownToken, WorkerPool};
