// Wrapped Queue
// Buffers pushes while the real backend is constructed in the background

use super::{start_state, Lifecycle, ManagedQueue, Queue};
use crate::application::worker::constants::{FLUSH_POLL_INTERVAL, WRAP_RETRY_INTERVAL};
use crate::application::worker::{PoolStatus, ShutdownSender};
use crate::domain::{Item, PoolTuning, QueueConfig, QueueKind, QueueState, StateCell};
use crate::error::{QueueError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Builds the real queue; called once per attempt
pub type QueueConstructor<T> =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Queue<T>>>> + Send + Sync>;

struct WrappedInner<T: Item> {
    name: String,
    kind: QueueKind,
    config: QueueConfig,
    state: StateCell,
    constructor: QueueConstructor<T>,
    real: RwLock<Option<Arc<dyn Queue<T>>>>,
    handoff_tx: mpsc::Sender<T>,
    handoff_rx: Mutex<Option<mpsc::Receiver<T>>>,
    stop: ShutdownSender,
}

/// Stand-in for a queue whose backend is not available yet.
///
/// Pushes are held in a bounded handoff buffer until the constructor
/// succeeds; the real queue is then run and receives the held items.
pub struct WrappedQueue<T: Item> {
    inner: Arc<WrappedInner<T>>,
    builder: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Item> WrappedQueue<T> {
    pub fn new(kind: QueueKind, config: &QueueConfig, constructor: QueueConstructor<T>) -> Result<Self> {
        config.validate()?;
        let (handoff_tx, handoff_rx) = mpsc::channel(config.queue_length);
        Ok(Self {
            inner: Arc::new(WrappedInner {
                name: config.name.clone(),
                kind,
                config: config.clone(),
                state: StateCell::new(),
                constructor,
                real: RwLock::new(None),
                handoff_tx,
                handoff_rx: Mutex::new(Some(handoff_rx)),
                stop: ShutdownSender::new(),
            }),
            builder: Mutex::new(None),
        })
    }

    /// The real queue, once constructed
    pub async fn real(&self) -> Option<Arc<dyn Queue<T>>> {
        self.inner.real.read().await.clone()
    }

    async fn push_to_real(&self, item: T) -> Result<()> {
        match self.real().await {
            Some(real) => real.push(item).await,
            None => Err(QueueError::Closed(self.inner.name.clone())),
        }
    }

    fn handoff_len(&self) -> usize {
        let tx = &self.inner.handoff_tx;
        tx.max_capacity() - tx.capacity()
    }
}

impl<T: Item> WrappedInner<T> {
    /// Retry the constructor until it succeeds, gives up, or the queue stops
    async fn build_real(self: Arc<Self>) {
        let deadline = Instant::now() + self.config.wrap_timeout;
        let mut stop = self.stop.token();
        let mut attempt: u32 = 0;

        let real = loop {
            attempt += 1;
            let built = tokio::select! {
                biased;
                _ = stop.wait() => return,
                built = (self.constructor)() => built,
            };
            match built {
                Ok(real) => break real,
                Err(e) if e.is_invalid_configuration() => {
                    error!(queue = %self.name, error = %e, "Wrapped queue has invalid configuration; giving up");
                    return;
                }
                Err(e) => {
                    warn!(queue = %self.name, attempt, error = %e, "Wrapped queue construction failed");
                }
            }
            if attempt >= self.config.max_attempts || Instant::now() >= deadline {
                error!(
                    queue = %self.name,
                    attempts = attempt,
                    "Unable to construct wrapped queue; items stay in the handoff buffer"
                );
                return;
            }
            tokio::select! {
                biased;
                _ = stop.wait() => return,
                _ = sleep(WRAP_RETRY_INTERVAL) => {}
            }
        };

        if let Err(e) = real.run().await {
            error!(queue = %self.name, error = %e, "Failed to run wrapped queue");
            return;
        }

        let rx = {
            let mut slot = self.real.write().await;
            *slot = Some(Arc::clone(&real));
            self.handoff_rx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
        };
        info!(queue = %self.name, attempts = attempt, "Wrapped queue constructed");

        let Some(mut rx) = rx else {
            return;
        };
        // late pushes see the handoff closed and go to the real queue
        rx.close();
        let mut moved = 0usize;
        while let Ok(item) = rx.try_recv() {
            if let Err(e) = real.push(item).await {
                error!(queue = %self.name, error = %e, "Failed to move held item into wrapped queue; item lost");
            } else {
                moved += 1;
            }
        }
        if moved > 0 {
            info!(queue = %self.name, count = moved, "Moved held items into wrapped queue");
        }
    }
}

#[async_trait]
impl<T: Item> Lifecycle for WrappedQueue<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn run(&self) -> Result<()> {
        start_state(&self.inner.state, &self.inner.name)?;
        let builder = tokio::spawn(Arc::clone(&self.inner).build_real());
        *self.builder.lock().unwrap_or_else(|e| e.into_inner()) = Some(builder);
        info!(queue = %self.inner.name, kind = %self.inner.kind, "Wrapped queue running");
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.inner.state.begin_shutdown() {
            return;
        }
        self.inner.stop.shutdown();
        let builder = self
            .builder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(builder) = builder {
            if let Err(e) = builder.await {
                error!(queue = %self.inner.name, error = %e, "Wrapped queue builder failed");
            }
        }

        match self.real().await {
            Some(real) => real.shutdown().await,
            None => {
                let held = self.handoff_len();
                if held > 0 {
                    warn!(
                        queue = %self.inner.name,
                        count = held,
                        "Shutting down before the wrapped queue was constructed; held items are lost"
                    );
                }
            }
        }
    }

    async fn terminate(&self) {
        self.shutdown().await;
        if !self.inner.state.terminate() {
            return;
        }
        if let Some(real) = self.real().await {
            real.terminate().await;
        }
        info!(queue = %self.inner.name, "Wrapped queue terminated");
    }
}

#[async_trait]
impl<T: Item> ManagedQueue for WrappedQueue<T> {
    fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    fn state(&self) -> QueueState {
        self.inner.state.get()
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(real) = self.real().await {
                let remaining = deadline.saturating_duration_since(Instant::now());
                return real
                    .flush(remaining)
                    .await
                    .map_err(|_| QueueError::DeadlineExceeded(timeout));
            }
            if self.handoff_len() == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(QueueError::DeadlineExceeded(timeout));
            }
            sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    async fn is_empty(&self) -> bool {
        match self.real().await {
            Some(real) => real.is_empty().await,
            None => self.handoff_len() == 0,
        }
    }

    fn pool_status(&self) -> PoolStatus {
        if let Ok(real) = self.inner.real.try_read() {
            if let Some(real) = real.as_ref() {
                return real.pool_status();
            }
        }
        let config = &self.inner.config;
        let held = self.handoff_len();
        PoolStatus {
            workers: 0,
            boosted: 0,
            max_workers: config.max_workers,
            boost_workers: config.boost_workers,
            boost_timeout: config.boost_timeout,
            block_timeout: config.block_timeout,
            batch_length: config.batch_length,
            queued: held,
            buffered: held,
        }
    }

    fn set_pool_settings(&self, tuning: PoolTuning) -> Result<()> {
        match self.inner.real.try_read() {
            Ok(real) => match real.as_ref() {
                Some(real) => real.set_pool_settings(tuning),
                None => Err(QueueError::InvalidState(format!(
                    "queue '{}' is not constructed yet",
                    self.inner.name
                ))),
            },
            Err(_) => Err(QueueError::InvalidState(format!(
                "queue '{}' is being constructed",
                self.inner.name
            ))),
        }
    }
}

#[async_trait]
impl<T: Item> Queue<T> for WrappedQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        let inner = &self.inner;
        let item = {
            let real = inner.real.read().await;
            if let Some(real) = real.as_ref() {
                return real.push(item).await;
            }
            if inner.state.is_closed() {
                return Err(QueueError::Closed(inner.name.clone()));
            }
            match inner.handoff_tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(item)) => item,
                Err(TrySendError::Closed(_)) => return Err(QueueError::Closed(inner.name.clone())),
            }
        };

        // wait for space without holding the lock the builder needs
        let block_timeout = inner.config.block_timeout;
        if !block_timeout.is_zero() {
            match inner.handoff_tx.send_timeout(item, block_timeout).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {}
                // handoff closed: the real queue has just been installed
                Err(SendTimeoutError::Closed(item)) => return self.push_to_real(item).await,
            }
        }
        warn!(queue = %inner.name, "Push rejected: handoff buffer full");
        Err(QueueError::Backpressure {
            queue: inner.name.clone(),
            waited: block_timeout,
        })
    }
}
