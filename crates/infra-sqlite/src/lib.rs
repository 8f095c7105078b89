// Spool Infrastructure - SQLite Adapter
// Implements: ByteFifo, UniqueByteFifo (local durable store)

mod connection;
mod error;
mod fifo;
mod migration;

pub use connection::{create_pool, DATABASE_FILE};
pub use error::map_sqlx_error;
pub use fifo::{SqliteByteFifo, SqliteUniqueByteFifo};
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for QueueError here)
