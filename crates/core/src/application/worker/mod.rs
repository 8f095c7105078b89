// Worker Pool - bounded buffer drained in batches by a scalable set of workers

mod boost;
pub mod constants;
mod panic_guard;
mod shutdown;

use boost::{monitor_tick, BoostAction, BoostTracker, Sample};
use panic_guard::run_guarded;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::domain::{DomainError, PoolConfig, PoolTuning};
use crate::error::{QueueError, Result};
use crate::port::BatchHandler;
use constants::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Called with every item as it leaves the buffer, before its handler runs
pub type DequeueHook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Snapshot of a pool, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub workers: usize,
    pub boosted: usize,
    pub max_workers: usize,
    pub boost_workers: usize,
    pub boost_timeout: Duration,
    pub block_timeout: Duration,
    pub batch_length: usize,
    /// Accepted but not yet handled (buffered, batched or in flight)
    pub queued: usize,
    /// Sitting in the buffer
    pub buffered: usize,
}

#[derive(Debug, Clone)]
struct Settings {
    workers: usize,
    max_workers: usize,
    boost_workers: usize,
    boost_timeout: Duration,
    block_timeout: Duration,
}

struct PoolInner<T> {
    name: String,
    batch_length: usize,
    queue_length: usize,
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    handler: Arc<dyn BatchHandler<T>>,
    on_dequeue: Option<DequeueHook<T>>,
    settings: Mutex<Settings>,
    queued: AtomicUsize,
    workers: AtomicUsize,
    boosted: AtomicUsize,
    drained: Notify,
    started: AtomicBool,
    cancel: ShutdownSender,
    boost_generation: Mutex<Option<ShutdownSender>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum Next<T> {
    Item(T),
    Linger,
    Disconnected,
}

/// A dynamically sized set of workers draining one bounded buffer.
///
/// Cloning yields another handle to the same pool.
pub struct WorkerPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(config: PoolConfig, handler: Arc<dyn BatchHandler<T>>) -> Self {
        Self::build(config, handler, None)
    }

    pub fn with_dequeue_hook(
        config: PoolConfig,
        handler: Arc<dyn BatchHandler<T>>,
        hook: DequeueHook<T>,
    ) -> Self {
        Self::build(config, handler, Some(hook))
    }

    fn build(
        config: PoolConfig,
        handler: Arc<dyn BatchHandler<T>>,
        on_dequeue: Option<DequeueHook<T>>,
    ) -> Self {
        let queue_length = config.queue_length.max(1);
        let (tx, rx) = mpsc::channel(queue_length);
        Self {
            inner: Arc::new(PoolInner {
                name: config.name,
                batch_length: config.batch_length.max(1),
                queue_length,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                handler,
                on_dequeue,
                settings: Mutex::new(Settings {
                    workers: config.workers,
                    max_workers: config.max_workers,
                    boost_workers: config.boost_workers,
                    boost_timeout: config.boost_timeout,
                    block_timeout: config.block_timeout,
                }),
                queued: AtomicUsize::new(0),
                workers: AtomicUsize::new(0),
                boosted: AtomicUsize::new(0),
                drained: Notify::new(),
                started: AtomicBool::new(false),
                cancel: ShutdownSender::new(),
                boost_generation: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start the steady-state workers and the saturation monitor.
    ///
    /// Only the first call has an effect.
    pub fn start(&self) {
        if self.inner.cancel.is_shutdown() || self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = self.inner.settings().workers;
        let started = self.inner.spawn_workers(workers, None, None);

        let monitor = tokio::spawn(monitor_loop(
            Arc::clone(&self.inner),
            self.inner.cancel.token(),
        ));
        self.inner.track(monitor);

        info!(queue = %self.inner.name, workers = started, "Worker pool started");
    }

    /// Place an item in the buffer, waiting up to `block_timeout` for space
    pub async fn push(&self, item: T) -> Result<()> {
        let inner = &self.inner;
        if inner.cancel.is_shutdown() {
            return Err(QueueError::Closed(inner.name.clone()));
        }
        let block_timeout = inner.settings().block_timeout;

        inner.queued.fetch_add(1, Ordering::SeqCst);
        let item = match inner.tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Closed(_)) => {
                inner.mark_handled(1);
                return Err(QueueError::Closed(inner.name.clone()));
            }
        };

        if !block_timeout.is_zero() {
            match inner.tx.send_timeout(item, block_timeout).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {}
                Err(SendTimeoutError::Closed(_)) => {
                    inner.mark_handled(1);
                    return Err(QueueError::Closed(inner.name.clone()));
                }
            }
        }

        inner.mark_handled(1);
        warn!(queue = %inner.name, waited = ?block_timeout, "Push rejected: buffer full");
        Err(QueueError::Backpressure {
            queue: inner.name.clone(),
            waited: block_timeout,
        })
    }

    /// Wait for buffer space for as long as it takes, unless `stop` fires first.
    ///
    /// The item is handed back if it could not be placed.
    pub async fn push_until(
        &self,
        item: T,
        stop: &mut ShutdownToken,
    ) -> std::result::Result<(), T> {
        let inner = &self.inner;
        if inner.cancel.is_shutdown() {
            return Err(item);
        }
        tokio::select! {
            biased;
            _ = stop.wait() => Err(item),
            permit = inner.tx.reserve() => match permit {
                Ok(permit) => {
                    inner.queued.fetch_add(1, Ordering::SeqCst);
                    permit.send(item);
                    Ok(())
                }
                Err(_) => Err(item),
            },
        }
    }

    /// Start up to `count` extra workers, never exceeding `max_workers`.
    ///
    /// With a non-zero `duration` they stop once it elapses. Returns how many
    /// were started.
    pub fn add_workers(&self, count: usize, duration: Duration) -> usize {
        if self.inner.cancel.is_shutdown() {
            return 0;
        }
        let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
        self.inner.spawn_workers(count, None, deadline)
    }

    /// Wait until every accepted item has been handled.
    ///
    /// With no running workers the caller handles batches itself.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(QueueError::DeadlineExceeded(timeout));
            }
            if self.inner.workers.load(Ordering::SeqCst) == 0 && self.help_flush().await {
                continue;
            }

            tokio::select! {
                _ = drained => {}
                _ = sleep(FLUSH_POLL_INTERVAL) => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Handle one batch on the caller's task; `false` if nothing was available
    async fn help_flush(&self) -> bool {
        let batch = {
            let Ok(mut rx) = self.inner.rx.try_lock() else {
                return false;
            };
            let mut batch = Vec::new();
            while batch.len() < self.inner.batch_length {
                match rx.try_recv() {
                    Ok(item) => {
                        self.inner.dequeued(&item);
                        batch.push(item);
                    }
                    Err(_) => break,
                }
            }
            batch
        };
        if batch.is_empty() {
            return false;
        }
        self.inner.dispatch(batch).await;
        true
    }

    /// No accepted item is still unhandled
    pub fn is_empty(&self) -> bool {
        self.inner.queued.load(Ordering::SeqCst) == 0
    }

    /// Accepted but not yet handled
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Stop all workers after their current batch; no further pushes
    pub fn cancel(&self) {
        if self.inner.cancel.is_shutdown() {
            return;
        }
        self.inner.cancel.shutdown();
        self.inner.end_boost();
        debug!(queue = %self.inner.name, "Worker pool cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_shutdown()
    }

    /// Wait for every worker and the monitor to exit
    pub async fn wait(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.lock_tasks());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!(queue = %self.inner.name, error = %e, "Worker task failed");
                }
            }
        }
    }

    /// Remove and return everything still in the buffer.
    ///
    /// Meant to be called after [`WorkerPool::cancel`] and [`WorkerPool::wait`].
    pub async fn drain_buffered(&self) -> Vec<T> {
        let mut rx = self.inner.rx.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            self.inner.dequeued(&item);
            items.push(item);
        }
        drop(rx);

        if !items.is_empty() {
            self.inner.mark_handled(items.len());
            debug!(queue = %self.inner.name, count = items.len(), "Drained buffered items");
        }
        items
    }

    pub fn status(&self) -> PoolStatus {
        let settings = self.inner.settings();
        PoolStatus {
            workers: self.inner.workers.load(Ordering::SeqCst),
            boosted: self.inner.boosted.load(Ordering::SeqCst),
            max_workers: settings.max_workers,
            boost_workers: settings.boost_workers,
            boost_timeout: settings.boost_timeout,
            block_timeout: settings.block_timeout,
            batch_length: self.inner.batch_length,
            queued: self.inner.queued.load(Ordering::SeqCst),
            buffered: self.inner.buffered(),
        }
    }

    /// Adjust scaling and backpressure settings of a live pool.
    ///
    /// Lowering `max_workers` stops no running worker; it only limits new ones.
    pub fn set_settings(&self, tuning: PoolTuning) -> Result<()> {
        let mut settings = self.inner.settings();
        if let Some(max_workers) = tuning.max_workers {
            if max_workers == 0 {
                return Err(DomainError::InvalidConfiguration(format!(
                    "queue '{}': max_workers must be at least 1",
                    self.inner.name
                ))
                .into());
            }
            settings.max_workers = max_workers;
        }
        if let Some(boost_workers) = tuning.boost_workers {
            settings.boost_workers = boost_workers;
        }
        if let Some(boost_timeout) = tuning.boost_timeout {
            settings.boost_timeout = boost_timeout;
        }
        if let Some(block_timeout) = tuning.block_timeout {
            settings.block_timeout = block_timeout;
        }
        info!(
            queue = %self.inner.name,
            max_workers = settings.max_workers,
            boost_workers = settings.boost_workers,
            "Worker pool settings updated"
        );
        Ok(())
    }
}

impl<T: Send + 'static> PoolInner<T> {
    fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn dequeued(&self, item: &T) {
        if let Some(hook) = &self.on_dequeue {
            hook(item);
        }
    }

    fn mark_handled(&self, count: usize) {
        let before = self.queued.fetch_sub(count, Ordering::SeqCst);
        if before == count {
            self.drained.notify_waiters();
        }
    }

    /// Reserve worker slots below `max_workers`; returns how many were granted
    fn reserve_slots(&self, wanted: usize) -> usize {
        let max_workers = self.settings().max_workers;
        let mut granted = 0;
        let _ = self
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                granted = wanted.min(max_workers.saturating_sub(current));
                Some(current + granted)
            });
        granted
    }

    fn spawn_workers(
        self: &Arc<Self>,
        wanted: usize,
        boost: Option<ShutdownToken>,
        deadline: Option<Instant>,
    ) -> usize {
        let granted = self.reserve_slots(wanted);
        for _ in 0..granted {
            if boost.is_some() {
                self.boosted.fetch_add(1, Ordering::SeqCst);
            }
            let task = tokio::spawn(worker_loop(
                Arc::clone(self),
                self.cancel.token(),
                boost.clone(),
                deadline,
            ));
            self.track(task);
        }
        granted
    }

    fn boost(self: &Arc<Self>) {
        let boost_workers = self.settings().boost_workers.max(1);
        let token = {
            let mut generation = self
                .boost_generation
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            generation.get_or_insert_with(ShutdownSender::new).token()
        };
        let added = self.spawn_workers(boost_workers, Some(token), None);
        if added > 0 {
            info!(
                queue = %self.name,
                added,
                workers = self.workers.load(Ordering::SeqCst),
                "Boosting worker pool"
            );
        }
    }

    fn end_boost(&self) {
        let generation = self
            .boost_generation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(generation) = generation {
            generation.shutdown();
            debug!(queue = %self.name, "Boost ended");
        }
    }

    /// Next item from the buffer.
    ///
    /// While lingering, the wait for the receiver lock counts against
    /// [`BATCH_LINGER`] too: another worker may sit in `recv` holding it.
    async fn next_item(&self, lingering: bool) -> Next<T> {
        let receive = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        let received = if lingering {
            match tokio::time::timeout(BATCH_LINGER, receive).await {
                Ok(received) => received,
                Err(_) => return Next::Linger,
            }
        } else {
            receive.await
        };
        match received {
            Some(item) => {
                self.dequeued(&item);
                Next::Item(item)
            }
            None => Next::Disconnected,
        }
    }

    async fn dispatch(&self, batch: Vec<T>) {
        let batch_size = batch.len();
        let handler = Arc::clone(&self.handler);
        if let Err(panic_msg) = run_guarded(async move { handler.handle(batch).await }).await {
            error!(
                queue = %self.name,
                batch_size,
                panic_msg = %panic_msg,
                "Handler panicked; batch dropped"
            );
        }
        self.mark_handled(batch_size);
    }
}

async fn until_signalled(token: Option<&mut ShutdownToken>) {
    match token {
        Some(token) => token.wait().await,
        None => std::future::pending().await,
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn worker_loop<T: Send + 'static>(
    inner: Arc<PoolInner<T>>,
    mut cancel: ShutdownToken,
    mut boost: Option<ShutdownToken>,
    deadline: Option<Instant>,
) {
    let boosted = boost.is_some();
    let mut batch = Vec::with_capacity(inner.batch_length);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.wait() => break,
            _ = until_signalled(boost.as_mut()) => break,
            _ = until_deadline(deadline) => break,
            next = inner.next_item(!batch.is_empty()) => next,
        };
        match next {
            Next::Item(item) => {
                batch.push(item);
                if batch.len() >= inner.batch_length {
                    inner.dispatch(std::mem::take(&mut batch)).await;
                }
            }
            Next::Linger => {
                inner.dispatch(std::mem::take(&mut batch)).await;
            }
            Next::Disconnected => break,
        }
    }

    // a batch already pulled is always handled
    if !batch.is_empty() {
        inner.dispatch(batch).await;
    }

    inner.workers.fetch_sub(1, Ordering::SeqCst);
    if boosted {
        inner.boosted.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn monitor_loop<T: Send + 'static>(inner: Arc<PoolInner<T>>, mut cancel: ShutdownToken) {
    let mut tracker = BoostTracker::new();
    loop {
        let boost_timeout = inner.settings().boost_timeout;
        tokio::select! {
            biased;
            _ = cancel.wait() => break,
            _ = sleep(monitor_tick(boost_timeout)) => {}
        }

        let sample = Sample {
            buffered: inner.buffered(),
            capacity: inner.queue_length,
            workers: inner.workers.load(Ordering::SeqCst),
            boosted: inner.boosted.load(Ordering::SeqCst),
        };
        match tracker.observe(Instant::now(), sample, boost_timeout) {
            BoostAction::Boost => inner.boost(),
            BoostAction::EndBoost => inner.end_boost(),
            BoostAction::None => {}
        }
    }
}
