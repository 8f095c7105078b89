// Redis ByteFifo Implementation
// One list per queue (RPUSH/LPOP); unique queues add one set (SADD/SREM)

use crate::error::map_redis_error;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use spool_core::application::worker::ShutdownSender;
use spool_core::domain::DomainError;
use spool_core::error::{QueueError, Result};
use spool_core::port::{ByteFifo, Precommit, UniqueByteFifo};
use std::future::Future;
use tracing::{info, warn};

/// Pops the head of KEYS[1] and drops it from the set KEYS[2] in one step
const POP_AND_RELEASE: &str = r#"
local data = redis.call('LPOP', KEYS[1])
if data then
    redis.call('SREM', KEYS[2], data)
end
return data
"#;

struct RedisList {
    conn: ConnectionManager,
    key: String,
    /// Tripped by close; aborts in-flight calls
    closed: ShutdownSender,
}

impl RedisList {
    async fn connect(connection_string: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(connection_string).map_err(|e| {
            DomainError::InvalidConfiguration(format!("invalid redis connection string: {}", e))
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        info!(key = %key, "Connected remote list store");
        Ok(Self {
            conn,
            key: key.to_string(),
            closed: ShutdownSender::new(),
        })
    }

    /// Run a command unless the store is closed, giving up as soon as it closes
    async fn guarded<R, F>(&self, command: F) -> Result<R>
    where
        F: Future<Output = redis::RedisResult<R>> + Send,
    {
        if self.closed.is_shutdown() {
            return Err(QueueError::Closed(self.key.clone()));
        }
        let mut closed = self.closed.token();
        tokio::select! {
            result = command => result.map_err(map_redis_error),
            _ = closed.wait() => Err(QueueError::Closed(self.key.clone())),
        }
    }

    async fn rpush(&self, data: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.rpush::<_, _, ()>(&self.key, data).await })
            .await
    }

    async fn lpop(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.lpop::<_, Option<Vec<u8>>>(&self.key, None).await })
            .await
    }

    async fn llen(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.llen::<_, usize>(&self.key).await })
            .await
    }

    fn close(&self) {
        self.closed.shutdown();
    }
}

/// Remote FIFO over one Redis list
pub struct RedisByteFifo {
    list: RedisList,
}

impl RedisByteFifo {
    pub async fn connect(connection_string: &str, queue_key: &str) -> Result<Self> {
        Ok(Self {
            list: RedisList::connect(connection_string, queue_key).await?,
        })
    }
}

#[async_trait]
impl ByteFifo for RedisByteFifo {
    async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()> {
        if let Some(precommit) = precommit {
            precommit()?;
        }
        self.list.rpush(data).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        self.list.lpop().await
    }

    async fn len(&self) -> Result<usize> {
        self.list.llen().await
    }

    async fn close(&self) -> Result<()> {
        self.list.close();
        Ok(())
    }
}

/// Remote FIFO whose queued entries are mirrored in a Redis set
pub struct RedisUniqueByteFifo {
    list: RedisList,
    set_key: String,
    pop_script: redis::Script,
}

impl RedisUniqueByteFifo {
    pub async fn connect(connection_string: &str, queue_key: &str, set_key: &str) -> Result<Self> {
        Ok(Self {
            list: RedisList::connect(connection_string, queue_key).await?,
            set_key: set_key.to_string(),
            pop_script: redis::Script::new(POP_AND_RELEASE),
        })
    }

    async fn release(&self, data: &[u8]) -> Result<()> {
        let mut conn = self.list.conn.clone();
        self.list
            .guarded(async move { conn.srem::<_, _, ()>(&self.set_key, data).await })
            .await
    }
}

#[async_trait]
impl ByteFifo for RedisUniqueByteFifo {
    async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()> {
        let mut conn = self.list.conn.clone();
        let added: i64 = self
            .list
            .guarded(async move { conn.sadd::<_, _, i64>(&self.set_key, data).await })
            .await?;
        if added == 0 {
            return Err(QueueError::AlreadyInQueue);
        }

        if let Some(precommit) = precommit {
            if let Err(e) = precommit() {
                self.release(data).await?;
                return Err(e);
            }
        }

        if let Err(e) = self.list.rpush(data).await {
            if let Err(release_err) = self.release(data).await {
                warn!(key = %self.set_key, error = %release_err, "Failed to release membership");
            }
            return Err(e);
        }
        Ok(())
    }

    /// The entry leaves the list and the set atomically, so a failed call
    /// never strands an identity without its entry.
    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.list.conn.clone();
        let mut invocation = self.pop_script.prepare_invoke();
        invocation.key(&self.list.key).key(&self.set_key);
        self.list
            .guarded(async move {
                invocation
                    .invoke_async::<Option<Vec<u8>>>(&mut conn)
                    .await
            })
            .await
    }

    async fn len(&self) -> Result<usize> {
        self.list.llen().await
    }

    async fn close(&self) -> Result<()> {
        self.list.close();
        Ok(())
    }
}

#[async_trait]
impl UniqueByteFifo for RedisUniqueByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool> {
        let mut conn = self.list.conn.clone();
        self.list
            .guarded(async move { conn.sismember::<_, _, bool>(&self.set_key, data).await })
            .await
    }
}
