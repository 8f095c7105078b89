// Domain Layer - Queue configuration, kinds, lifecycle states and items

pub mod config;
pub mod error;
pub mod item;
pub mod kind;
pub mod state;

// Re-exports
pub use config::{PoolConfig, PoolTuning, QueueConfig};
pub use error::DomainError;
pub use item::{decode, encode, Item};
pub use kind::QueueKind;
pub use state::{QueueState, StateCell};
