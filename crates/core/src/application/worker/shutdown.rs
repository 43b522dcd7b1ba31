// Worker Shutdown Token

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the shutdown signal. Returns at once if it was already sent
    /// or the sender is gone.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Another token for a background loop
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_after_signal() {
        let (tx, mut token) = shutdown_channel();
        let mut late = tx.token();
        assert!(!token.is_shutdown());

        tx.shutdown();
        token.wait().await;
        late.wait().await;
        assert!(late.is_shutdown());
    }

    #[test]
    fn test_wait_pending_until_signal() {
        let (tx, mut token) = shutdown_channel();
        let mut wait = tokio_test::task::spawn(token.wait());
        tokio_test::assert_pending!(wait.poll());

        tx.shutdown();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }
}
