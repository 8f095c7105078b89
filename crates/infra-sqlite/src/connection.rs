// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use spool_core::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Database file created inside each queue's data directory
pub const DATABASE_FILE: &str = "fifo.db";

/// Create SQLite connection pool with WAL mode for the store in `data_dir`
pub async fn create_pool(data_dir: &Path) -> Result<SqlitePool> {
    tokio::fs::create_dir_all(data_dir).await?;

    let options = SqliteConnectOptions::new()
        .filename(data_dir.join(DATABASE_FILE))
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
