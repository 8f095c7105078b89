// Port Layer - Interfaces for external dependencies

pub mod byte_fifo;
pub mod handler;

// Re-exports
pub use byte_fifo::{ByteFifo, Precommit, UniqueByteFifo};
pub use handler::BatchHandler;
