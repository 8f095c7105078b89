// Backing Store Port (ByteFIFO)
// Durable, ordered byte queue. Implemented by infra-sqlite and infra-redis.

use crate::error::Result;
use async_trait::async_trait;

/// Side effect that must succeed before an entry is appended
pub type Precommit = Box<dyn FnOnce() -> Result<()> + Send>;

/// Ordered byte-level FIFO owned by exactly one queue
#[async_trait]
pub trait ByteFifo: Send + Sync {
    /// Run `precommit` (if any), then durably append `data`.
    ///
    /// If the precommit fails its error is returned and nothing is appended.
    async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()>;

    async fn push(&self, data: &[u8]) -> Result<()> {
        self.push_func(data, None).await
    }

    /// Remove and return the oldest entry; `Ok(None)` when empty
    async fn pop(&self) -> Result<Option<Vec<u8>>>;

    /// Best-effort entry count
    async fn len(&self) -> Result<usize>;

    /// Release the underlying handle; later calls fail with `Closed`
    async fn close(&self) -> Result<()>;
}

/// A FIFO that also tracks the set of entries currently queued.
///
/// `push_func` fails with `AlreadyInQueue` (without running the precommit)
/// when an equal entry is still queued; `pop` removes the entry from the set.
#[async_trait]
pub trait UniqueByteFifo: ByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::QueueError;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        entries: VecDeque<Vec<u8>>,
        members: HashSet<Vec<u8>>,
    }

    /// In-memory FIFO implementing both store contracts.
    ///
    /// Built as plain ([`MemoryByteFifo::new`]) or unique
    /// ([`MemoryByteFifo::new_unique`]); a plain instance never rejects
    /// duplicates. Can be told to fail the next N pops.
    #[derive(Default)]
    pub struct MemoryByteFifo {
        name: String,
        unique: bool,
        inner: Mutex<Inner>,
        closed: AtomicBool,
        failing_pops: AtomicUsize,
    }

    impl MemoryByteFifo {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                ..Default::default()
            }
        }

        pub fn new_unique(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                unique: true,
                ..Default::default()
            }
        }

        /// The next `count` pops fail with a storage error
        pub fn fail_next_pops(&self, count: usize) {
            self.failing_pops.store(count, Ordering::SeqCst);
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// Snapshot of the queued entries, oldest first
        pub fn entries(&self) -> Vec<Vec<u8>> {
            self.lock().entries.iter().cloned().collect()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn ensure_open(&self) -> Result<()> {
            if self.is_closed() {
                return Err(QueueError::Closed(self.name.clone()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ByteFifo for MemoryByteFifo {
        async fn push_func(&self, data: &[u8], precommit: Option<Precommit>) -> Result<()> {
            self.ensure_open()?;
            let mut inner = self.lock();
            if self.unique && inner.members.contains(data) {
                return Err(QueueError::AlreadyInQueue);
            }
            if let Some(precommit) = precommit {
                precommit()?;
            }
            if self.unique {
                inner.members.insert(data.to_vec());
            }
            inner.entries.push_back(data.to_vec());
            Ok(())
        }

        async fn pop(&self) -> Result<Option<Vec<u8>>> {
            self.ensure_open()?;
            let failing = self.failing_pops.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_pops.store(failing - 1, Ordering::SeqCst);
                return Err(QueueError::Storage("injected pop failure".to_string()));
            }
            let mut inner = self.lock();
            let popped = inner.entries.pop_front();
            if let Some(data) = &popped {
                inner.members.remove(data);
            }
            Ok(popped)
        }

        async fn len(&self) -> Result<usize> {
            self.ensure_open()?;
            Ok(self.lock().entries.len())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl UniqueByteFifo for MemoryByteFifo {
        async fn has(&self, data: &[u8]) -> Result<bool> {
            self.ensure_open()?;
            Ok(self.lock().members.contains(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MemoryByteFifo;
    use super::*;
    use crate::error::QueueError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_push_pop_preserves_order_and_bytes() {
        let fifo = MemoryByteFifo::new("test");
        fifo.push(b"\"A\"").await.unwrap();
        fifo.push(b"\"B\"").await.unwrap();

        assert_eq!(fifo.len().await.unwrap(), 2);
        assert_eq!(fifo.pop().await.unwrap().as_deref(), Some(&b"\"A\""[..]));
        assert_eq!(fifo.pop().await.unwrap().as_deref(), Some(&b"\"B\""[..]));
        assert_eq!(fifo.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_precommit_appends_nothing() {
        let fifo = MemoryByteFifo::new("test");
        let result = fifo
            .push_func(
                b"x",
                Some(Box::new(|| Err(QueueError::Internal("nope".to_string())))),
            )
            .await;

        assert!(matches!(result, Err(QueueError::Internal(_))));
        assert_eq!(fifo.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_rejects_duplicates_without_precommit() {
        let fifo = MemoryByteFifo::new_unique("test");
        fifo.push(b"x").await.unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let result = fifo
            .push_func(
                b"x",
                Some(Box::new(move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .await;

        assert!(matches!(result, Err(QueueError::AlreadyInQueue)));
        assert!(!ran.load(Ordering::SeqCst));

        assert!(fifo.has(b"x").await.unwrap());
        fifo.pop().await.unwrap();
        assert!(!fifo.has(b"x").await.unwrap());
        fifo.push(b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_fifo_rejects_operations() {
        let fifo = MemoryByteFifo::new("test");
        fifo.close().await.unwrap();
        assert!(matches!(fifo.push(b"x").await, Err(QueueError::Closed(_))));
        assert!(matches!(fifo.pop().await, Err(QueueError::Closed(_))));
    }
}
