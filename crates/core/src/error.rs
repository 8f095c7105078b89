// Central Error Type for the Queue Subsystem

use std::time::Duration;
use thiserror::Error;

/// Queue-level error type
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// A unique queue already holds an item with this identity
    #[error("Item is already in the queue")]
    AlreadyInQueue,

    #[error("Queue '{queue}' is full: push blocked for {waited:?}")]
    Backpressure { queue: String, waited: Duration },

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue '{0}' is closed")]
    Closed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Construction can never succeed with this configuration
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(
            self,
            QueueError::Domain(crate::domain::DomainError::InvalidConfiguration(_))
                | QueueError::Domain(crate::domain::DomainError::UnknownQueueKind(_))
        )
    }

    pub fn is_already_in_queue(&self) -> bool {
        matches!(self, QueueError::AlreadyInQueue)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, QueueError::DeadlineExceeded(_))
    }
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;

// Note: sqlx::Error and redis::RedisError conversions live in the infra crates
// (map_sqlx_error / map_redis_error) because of the orphan rule.
