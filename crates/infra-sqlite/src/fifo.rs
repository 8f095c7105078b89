// SQLite ByteFifo Implementation
// fifo_items is the ordered log; fifo_members holds the identities of unique queues

use crate::connection::create_pool;
use crate::error::map_sqlx_error;
use crate::migration::run_migrations;
use async_trait::async_trait;
use spool_core::error::{QueueError, Result};
use spool_core::port::{ByteFifo, Precommit, UniqueByteFifo};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const POP_OLDEST: &str = "DELETE FROM fifo_items \
     WHERE seq = (SELECT MIN(seq) FROM fifo_items WHERE queue = ?) \
     RETURNING data";

const INSERT_ITEM: &str = "INSERT INTO fifo_items (queue, data) VALUES (?, ?)";

/// Pool plus the queue it owns inside the database
struct SqliteStore {
    pool: SqlitePool,
    queue: String,
    closed: AtomicBool,
}

impl SqliteStore {
    async fn open(data_dir: &Path, queue: &str) -> Result<Self> {
        let pool = create_pool(data_dir).await?;
        run_migrations(&pool).await?;
        info!(queue = %queue, dir = %data_dir.display(), "Opened local store");
        Ok(Self {
            pool,
            queue: queue.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn pool(&self) -> Result<&SqlitePool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.queue.clone()));
        }
        Ok(&self.pool)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fifo_items WHERE queue = ?")
            .bind(&self.queue)
            .fetch_one(self.pool()?)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count as usize)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
            debug!(queue = %self.queue, "Closed local store");
        }
    }
}

/// Durable FIFO in `<data_dir>/fifo.db`
pub struct SqliteByteFifo {
    store: SqliteStore,
}

impl SqliteByteFifo {
    pub async fn open(data_dir: impl AsRef<Path>, queue: &str) -> Result<Self> {
        Ok(Self {
            store: SqliteStore::open(data_dir.as_ref(), queue).await?,
        })
    }
}

#[async_trait]
impl ByteFifo for SqliteByteFifo {
    async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()> {
        let pool = self.store.pool()?;
        if let Some(precommit) = precommit {
            precommit()?;
        }
        sqlx::query(INSERT_ITEM)
            .bind(&self.store.queue)
            .bind(data)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar(POP_OLDEST)
            .bind(&self.store.queue)
            .fetch_optional(self.store.pool()?)
            .await
            .map_err(map_sqlx_error)
    }

    async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await;
        Ok(())
    }
}

/// Durable FIFO whose queued entries are also members of a named set.
///
/// The set and the log change in one transaction.
pub struct SqliteUniqueByteFifo {
    store: SqliteStore,
    set: String,
}

impl SqliteUniqueByteFifo {
    pub async fn open(data_dir: impl AsRef<Path>, queue: &str, set: &str) -> Result<Self> {
        Ok(Self {
            store: SqliteStore::open(data_dir.as_ref(), queue).await?,
            set: set.to_string(),
        })
    }
}

#[async_trait]
impl ByteFifo for SqliteUniqueByteFifo {
    async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()> {
        let mut tx = self.store.pool()?.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query("INSERT OR IGNORE INTO fifo_members (set_name, data) VALUES (?, ?)")
            .bind(&self.set)
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        if inserted == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(QueueError::AlreadyInQueue);
        }

        if let Some(precommit) = precommit {
            if let Err(e) = precommit() {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Err(e);
            }
        }

        sqlx::query(INSERT_ITEM)
            .bind(&self.store.queue)
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut tx = self.store.pool()?.begin().await.map_err(map_sqlx_error)?;

        let data: Option<Vec<u8>> = sqlx::query_scalar(POP_OLDEST)
            .bind(&self.store.queue)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if let Some(data) = &data {
            sqlx::query("DELETE FROM fifo_members WHERE set_name = ? AND data = ?")
                .bind(&self.set)
                .bind(data.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(data)
    }

    async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await;
        Ok(())
    }
}

#[async_trait]
impl UniqueByteFifo for SqliteUniqueByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM fifo_members WHERE set_name = ? AND data = ?)",
        )
        .bind(&self.set)
        .bind(data)
        .fetch_one(self.store.pool()?)
        .await
        .map_err(map_sqlx_error)?;
        Ok(found != 0)
    }
}
