// Shutdown Coordinator - process-wide graceful shutdown and terminate
// Queues subscribe once; shutdown and terminate each run their hooks exactly once

use crate::application::queue::Lifecycle;
use crate::application::worker::{ShutdownSender, ShutdownToken};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct ShutdownCoordinator {
    subscribers: Mutex<Vec<Arc<dyn Lifecycle>>>,
    shutdown_started: AtomicBool,
    terminate_started: AtomicBool,
    shutdown_done: ShutdownSender,
    terminate_done: ShutdownSender,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            shutdown_started: AtomicBool::new(false),
            terminate_started: AtomicBool::new(false),
            shutdown_done: ShutdownSender::new(),
            terminate_done: ShutdownSender::new(),
        }
    }

    pub fn subscribe(&self, queue: Arc<dyn Lifecycle>) {
        self.lock().push(queue);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Shut every subscriber down concurrently.
    /// Later callers wait for the first call to finish.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            self.shutdown_done.token().wait().await;
            return;
        }
        let queues = self.snapshot();
        info!(queues = queues.len(), "Graceful shutdown started");
        join_all(queues.iter().map(|q| q.shutdown())).await;
        self.shutdown_done.shutdown();
        info!("Graceful shutdown complete");
    }

    /// Terminate every subscriber after shutdown has completed
    pub async fn terminate(&self) {
        self.shutdown().await;
        if self.terminate_started.swap(true, Ordering::SeqCst) {
            self.terminate_done.token().wait().await;
            return;
        }
        let queues = self.snapshot();
        join_all(queues.iter().map(|q| q.terminate())).await;
        self.terminate_done.shutdown();
        info!("All queues terminated");
    }

    /// Fires once shutdown has completed
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_done.token()
    }

    /// Fires once terminate has completed
    pub fn terminate_token(&self) -> ShutdownToken {
        self.terminate_done.token()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Lifecycle>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Lifecycle>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingQueue {
        shutdowns: AtomicUsize,
        terminates: AtomicUsize,
        shutdown_seen_before_terminate: AtomicBool,
    }

    #[async_trait]
    impl Lifecycle for CountingQueue {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        async fn terminate(&self) {
            if self.shutdowns.load(Ordering::SeqCst) > 0 {
                self.shutdown_seen_before_terminate.store(true, Ordering::SeqCst);
            }
            self.terminates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_shutdown_runs_each_hook_once() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let queue = Arc::new(CountingQueue::default());
        coordinator.subscribe(queue.clone());

        let a = tokio::spawn({
            let c = coordinator.clone();
            async move { c.shutdown().await }
        });
        let b = tokio::spawn({
            let c = coordinator.clone();
            async move { c.shutdown().await }
        });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(queue.shutdowns.load(Ordering::SeqCst), 1);
        assert!(coordinator.shutdown_token().is_shutdown());
        assert!(!coordinator.terminate_token().is_shutdown());
    }

    #[tokio::test]
    async fn test_terminate_implies_shutdown_first() {
        let coordinator = ShutdownCoordinator::new();
        let queue = Arc::new(CountingQueue::default());
        coordinator.subscribe(queue.clone());

        coordinator.terminate().await;
        coordinator.terminate().await;

        assert_eq!(queue.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(queue.terminates.load(Ordering::SeqCst), 1);
        assert!(queue.shutdown_seen_before_terminate.load(Ordering::SeqCst));
        assert!(coordinator.terminate_token().is_shutdown());
    }

    #[tokio::test]
    async fn test_waiters_see_completion() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.subscribe(Arc::new(CountingQueue::default()));

        let mut token = coordinator.terminate_token();
        let waiter = tokio::spawn(async move { token.wait().await });

        coordinator.terminate().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
