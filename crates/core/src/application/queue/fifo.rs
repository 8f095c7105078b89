// Persisted Queue
// Every push goes to the backing store; a read loop feeds the worker pool

use super::{start_state, Lifecycle, ManagedQueue, Queue, UniqueQueue};
use crate::application::worker::constants::{
    FLUSH_POLL_INTERVAL, READ_BACKOFF_FACTOR, READ_BACKOFF_INITIAL, READ_BACKOFF_MAX,
};
use crate::application::worker::{PoolStatus, ShutdownSender, ShutdownToken, WorkerPool};
use crate::domain::{decode, encode, Item, PoolTuning, QueueConfig, QueueKind, QueueState, StateCell};
use crate::error::{QueueError, Result};
use crate::port::{BatchHandler, ByteFifo, Precommit, UniqueByteFifo};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Queue persisted in a [`ByteFifo`]; `S` is the store, possibly unsized
pub struct FifoQueue<T, S: ?Sized> {
    name: String,
    kind: QueueKind,
    state: StateCell,
    store: Arc<S>,
    pool: WorkerPool<T>,
    stop_reading: ShutdownSender,
    terminated: ShutdownSender,
    shutdown_done: ShutdownSender,
    /// Set while the read loop holds a popped item not yet in the pool
    holding: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<Option<T>>>>,
}

/// A persisted queue over a store that keeps a membership set
pub type UniqueFifoQueue<T> = FifoQueue<T, dyn UniqueByteFifo>;

impl<T, S> FifoQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    pub fn new(
        kind: QueueKind,
        config: &QueueConfig,
        store: Arc<S>,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            kind,
            state: StateCell::new(),
            store,
            pool: WorkerPool::new(config.pool_config(), handler),
            stop_reading: ShutdownSender::new(),
            terminated: ShutdownSender::new(),
            shutdown_done: ShutdownSender::new(),
            holding: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn ensure_not_terminated(&self) -> Result<()> {
        if self.state.is_terminated() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) async fn push_with(&self, item: &T, precommit: Option<Precommit>) -> Result<()> {
        self.ensure_not_terminated()?;
        let data = encode(item)?;
        self.store.push_func(&data, precommit).await
    }

    /// Put an item back after it was popped but never handled.
    ///
    /// Bypasses the terminated check: terminate closes the store only after
    /// shutdown has finished returning items.
    async fn return_to_store(&self, item: &T) {
        let returned = match encode(item) {
            Ok(data) => self.store.push(&data).await,
            Err(e) => Err(e.into()),
        };
        match returned {
            Ok(()) => {}
            Err(QueueError::AlreadyInQueue) => {
                debug!(queue = %self.name, "Returned item already queued again");
            }
            Err(e) => {
                error!(queue = %self.name, error = %e, "Failed to return item to store; item lost");
            }
        }
    }

    /// Nothing in the pool and nothing in the read loop's hands
    fn is_drained(&self) -> bool {
        self.pool.is_empty() && !self.holding.load(Ordering::SeqCst)
    }

    async fn store_len(&self) -> usize {
        match self.store.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "Failed to read store length");
                0
            }
        }
    }

    async fn stop_reader(&self) {
        self.stop_reading.shutdown();
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(reader) = reader else {
            return;
        };
        match reader.await {
            Ok(Some(item)) => self.return_to_store(&item).await,
            Ok(None) => {}
            Err(e) => error!(queue = %self.name, error = %e, "Read loop failed"),
        }
    }
}

/// Delay after an empty or failed pop: 100ms, then half again each time, capped
fn next_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => READ_BACKOFF_INITIAL,
        Some(previous) => previous.mul_f64(READ_BACKOFF_FACTOR).min(READ_BACKOFF_MAX),
    }
}

/// Feed the pool from the store until told to stop.
///
/// Returns the item that was popped but could not be placed in the pool.
async fn read_loop<T, S>(
    name: String,
    store: Arc<S>,
    pool: WorkerPool<T>,
    holding: Arc<AtomicBool>,
    mut stop: ShutdownToken,
    mut terminated: ShutdownToken,
) -> Option<T>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    let mut backoff: Option<Duration> = None;
    loop {
        if stop.is_shutdown() {
            return None;
        }
        holding.store(true, Ordering::SeqCst);
        let popped = tokio::select! {
            biased;
            _ = terminated.wait() => {
                holding.store(false, Ordering::SeqCst);
                return None;
            }
            popped = store.pop() => popped,
        };

        match popped {
            Ok(Some(data)) => {
                backoff = None;
                match decode::<T>(&data) {
                    Ok(item) => {
                        let placed = pool.push_until(item, &mut stop).await;
                        holding.store(false, Ordering::SeqCst);
                        if let Err(item) = placed {
                            return Some(item);
                        }
                    }
                    Err(e) => {
                        holding.store(false, Ordering::SeqCst);
                        error!(queue = %name, error = %e, "Undecodable entry dropped from store");
                    }
                }
                continue;
            }
            Ok(None) => holding.store(false, Ordering::SeqCst),
            Err(e) => {
                holding.store(false, Ordering::SeqCst);
                warn!(queue = %name, error = %e, "Failed to pop from store");
            }
        }

        let delay = next_backoff(backoff);
        backoff = Some(delay);
        tokio::select! {
            biased;
            _ = stop.wait() => return None,
            _ = sleep(delay) => {}
        }
    }
}

#[async_trait]
impl<T, S> Lifecycle for FifoQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        start_state(&self.state, &self.name)?;
        self.pool.start();

        let reader = tokio::spawn(read_loop(
            self.name.clone(),
            Arc::clone(&self.store),
            self.pool.clone(),
            Arc::clone(&self.holding),
            self.stop_reading.token(),
            self.terminated.token(),
        ));
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);

        info!(queue = %self.name, kind = %self.kind, "Queue running");
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            return;
        }
        info!(queue = %self.name, "Queue shutting down");

        self.stop_reader().await;
        self.pool.cancel();
        self.pool.wait().await;

        let leftovers = self.pool.drain_buffered().await;
        if !leftovers.is_empty() {
            debug!(queue = %self.name, count = leftovers.len(), "Returning unhandled items to store");
        }
        for item in &leftovers {
            self.return_to_store(item).await;
        }
        self.shutdown_done.shutdown();
    }

    async fn terminate(&self) {
        self.shutdown().await;
        if !self.state.terminate() {
            return;
        }
        // unblocks an in-flight pop, then waits for a concurrent shutdown
        self.terminated.shutdown();
        self.shutdown_done.token().wait().await;

        if let Err(e) = self.store.close().await {
            warn!(queue = %self.name, error = %e, "Failed to close store");
        }
        info!(queue = %self.name, "Queue terminated");
    }
}

#[async_trait]
impl<T, S> ManagedQueue for FifoQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn state(&self) -> QueueState {
        self.state.get()
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.pool
                .flush(remaining)
                .await
                .map_err(|_| QueueError::DeadlineExceeded(timeout))?;

            if self.store_len().await == 0 && self.is_drained() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(QueueError::DeadlineExceeded(timeout));
            }
            sleep(FLUSH_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn is_empty(&self) -> bool {
        self.is_drained() && self.store_len().await == 0
    }

    fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    fn set_pool_settings(&self, tuning: PoolTuning) -> Result<()> {
        self.pool.set_settings(tuning)
    }
}

#[async_trait]
impl<T, S> Queue<T> for FifoQueue<T, S>
where
    T: Item,
    S: ByteFifo + ?Sized + 'static,
{
    async fn push(&self, item: T) -> Result<()> {
        self.push_with(&item, None).await
    }
}

#[async_trait]
impl<T: Item> UniqueQueue<T> for FifoQueue<T, dyn UniqueByteFifo> {
    async fn push_func(&self, item: T, precommit: Option<Precommit>) -> Result<()> {
        self.push_with(&item, precommit).await
    }

    async fn has(&self, item: &T) -> Result<bool> {
        self.ensure_not_terminated()?;
        let data = encode(item)?;
        self.store.has(&data).await
    }
}
