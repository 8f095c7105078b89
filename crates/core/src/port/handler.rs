// Batch Handler Port
// The consumer side of a queue: one handler per queue, invoked with batches

use async_trait::async_trait;
use std::future::Future;

/// Consumes batches of items.
///
/// A handler is invoked repeatedly for the whole lifetime of its queue, with
/// at most `batch_length` items per call. There is no return value: per-item
/// failures are the handler's to recover. A panic is caught at the batch
/// boundary; the batch is logged and dropped and the worker carries on.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn handle(&self, batch: Vec<T>);
}

#[async_trait]
impl<T, F, Fut> BatchHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, batch: Vec<T>) {
        (self)(batch).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{watch, Notify};

    /// Records every batch it receives
    pub struct RecordingHandler<T> {
        batches: Mutex<Vec<Vec<T>>>,
        received: AtomicUsize,
        calls: AtomicUsize,
        notify: Notify,
        delay: Option<Duration>,
        panic_once: AtomicBool,
        gate: watch::Sender<bool>,
    }

    impl<T> Default for RecordingHandler<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T> RecordingHandler<T> {
        pub fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                received: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                notify: Notify::new(),
                delay: None,
                panic_once: AtomicBool::new(false),
                gate: watch::Sender::new(true),
            }
        }

        /// Sleep this long inside every invocation
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// The first invocation panics (its batch is not recorded)
        pub fn panicking_once(self) -> Self {
            self.panic_once.store(true, Ordering::SeqCst);
            self
        }

        /// Invocations block until [`RecordingHandler::open_gate`] is called
        pub fn gated(self) -> Self {
            self.gate.send_replace(false);
            self
        }

        pub fn open_gate(&self) {
            self.gate.send_replace(true);
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn item_count(&self) -> usize {
            self.received.load(Ordering::SeqCst)
        }

        /// Wait until at least `count` items were recorded
        pub async fn wait_for_items(&self, count: usize, timeout: Duration) -> bool {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.item_count() >= count {
                    return true;
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.item_count() >= count;
                }
            }
        }
    }

    impl<T: Clone> RecordingHandler<T> {
        pub fn batches(&self) -> Vec<Vec<T>> {
            self.batches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        pub fn items(&self) -> Vec<T> {
            self.batches().into_iter().flatten().collect()
        }
    }

    #[async_trait]
    impl<T> BatchHandler<T> for RecordingHandler<T>
    where
        T: Send + Sync + 'static,
    {
        async fn handle(&self, batch: Vec<T>) {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("handler failure injected by RecordingHandler");
            }

            let size = batch.len();
            self.batches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(batch);
            self.received.fetch_add(size, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }
}
