// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid queue state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown queue type: {0}")]
    UnknownQueueKind(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
