// Cancellation Signal

use tokio::sync::watch;

/// Receiving side of a one-shot cancellation signal
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal; returns at once if it was already given.
    ///
    /// Never returns if the sender is dropped without signalling.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sending side; signalling is sticky and idempotent
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSender {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    /// Signal shutdown to every current and future token
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let sender = ShutdownSender::new();
    let token = sender.token();
    (sender, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_when_already_signalled() {
        let (sender, mut token) = shutdown_channel();
        sender.shutdown();
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .expect("already-signalled token must not block");
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn test_token_created_after_signal_sees_it() {
        let sender = ShutdownSender::new();
        sender.shutdown();
        assert!(sender.token().is_shutdown());
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_wake() {
        let (sender, mut token) = shutdown_channel();
        drop(sender);
        let waited = tokio::time::timeout(Duration::from_millis(50), token.wait()).await;
        assert!(waited.is_err());
    }
}
