//! Spool - Main Entry Point
//! Feeds stdin lines into the configured queue; Ctrl+C or end of input shuts down

use anyhow::{Context, Result};
use spool_core::application::{QueueManager, ShutdownCoordinator};
use spool_core::VERSION;
use spool_daemon::{init_logging, QueueFactory, Settings};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let _log_guard = init_logging()?;
    info!("Spool v{} starting...", VERSION);

    // 2. Load configuration
    let settings = Settings::load()?;
    let queue_settings = settings
        .queue_settings(&settings.queue)
        .with_context(|| format!("queue '{}' is not configured", settings.queue))?;

    // 3. Wire manager, coordinator and factory
    let manager = Arc::new(QueueManager::new());
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let factory = QueueFactory::new(manager.clone()).with_coordinator(coordinator.clone());

    let queue_name = settings.queue.clone();
    let handler = Arc::new(move |batch: Vec<String>| {
        let queue_name = queue_name.clone();
        async move {
            for line in &batch {
                info!(queue = %queue_name, item = %line, "Handled");
            }
        }
    });

    let handle = factory
        .create::<String>(queue_settings.kind, &queue_settings.config, handler)
        .await
        .with_context(|| format!("failed to create queue '{}'", settings.queue))?;
    handle.lifecycle().run().await?;

    info!(queue = %handle.name(), kind = %handle.kind(), "System ready. Reading items from stdin");
    info!("Press Ctrl+C to shutdown");

    // 4. Feed stdin until EOF or Ctrl+C
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if let Err(e) = handle.push(line).await {
                        warn!(queue = %handle.name(), error = %e, "Push rejected");
                    }
                }
                None => {
                    info!("End of input");
                    if let Err(e) = manager.flush_all(settings.flush_timeout()).await {
                        warn!(error = %e, "Queues not drained before shutdown");
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully...");
                break;
            }
        }
    }

    // 5. Graceful shutdown, then terminate
    coordinator.terminate().await;

    for descriptor in manager.descriptors() {
        info!(queue = %descriptor.name, state = %descriptor.state, "Final state");
    }
    info!("Shutdown complete.");

    Ok(())
}
