//! Graceful shutdown plumbing
//!
//! One controller per process; every polling loop holds a cloned signal and
//! exits after its current iteration once shutdown is initiated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::info;

/// Cloneable shutdown signal observed by the polling loops
#[derive(Clone)]
pub struct ShutdownSignal {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolve when shutdown is initiated (immediately if it already was).
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Owns the stop flag; the composition root initiates shutdown exactly once.
pub struct ShutdownController {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            stopped: self.stopped.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("initiating graceful shutdown");
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on SIGTERM or Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Sleep that wakes early on shutdown; returns false when shutdown fired.
pub async fn sleep_or_shutdown(signal: &ShutdownSignal, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = signal.wait() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_observes_shutdown() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        assert!(!signal.is_shutdown());
        controller.shutdown();
        assert!(signal.is_shutdown());

        // wait() resolves immediately after shutdown
        signal.wait().await;
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.shutdown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_cuts_short() {
        let controller = ShutdownController::new();
        let signal = controller.signal();
        controller.shutdown();

        let start = std::time::Instant::now();
        let completed = sleep_or_shutdown(&signal, Duration::from_secs(60)).await;
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_double_shutdown_is_idempotent() {
        let controller = ShutdownController::new();
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutdown());
    }
}
