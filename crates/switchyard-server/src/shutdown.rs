//! Graceful shutdown signal handling.
//!
//! [`ShutdownSignal`] fans a single trigger (manual or SIGINT/SIGTERM) out to
//! the accept loop and every HTTP connection task. [`ConnectionTracker`]
//! counts HTTP connections so shutdown can wait for them to finish.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchyard_server::ShutdownSignal;
//! use std::time::Duration;
//!
//! let shutdown = ShutdownSignal::with_os_signals();
//! tokio::select! {
//!     () = shutdown.recv() => println!("shutting down"),
//!     () = tokio::time::sleep(Duration::from_secs(60)) => println!("timeout"),
//! }
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share state: triggering any clone wakes every waiter, and waiters
/// that arrive after the trigger return immediately.
///
/// # Example
///
/// ```rust
/// use switchyard_server::ShutdownSignal;
///
/// let signal = ShutdownSignal::new();
/// let clone = signal.clone();
///
/// clone.trigger();
/// assert!(signal.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Triggers shutdown. Returns `true` for the first trigger only.
    pub fn trigger(&self) -> bool {
        self.sender.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Returns true once triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits until the signal is triggered.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns once triggered.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// Creates a signal that SIGINT or SIGTERM (Ctrl+C elsewhere) triggers.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to register signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}

/// Counts live HTTP connections.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    /// Registers a connection; it counts until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.send_modify(|n| *n += 1);
        ConnectionToken {
            active: Arc::clone(&self.active),
        }
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        *self.active.borrow()
    }

    /// Waits until no connection is live.
    pub async fn wait_for_idle(&self) {
        let mut receiver = self.active.subscribe();
        let _ = receiver.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one connection counted by its [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_signal_new() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_shutdown_signal_trigger_once() {
        let signal = ShutdownSignal::new();
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_shutdown());
    }

    #[test]
    fn test_shutdown_signal_clone() {
        let signal1 = ShutdownSignal::new();
        let signal2 = signal1.clone();

        signal1.trigger();

        assert!(signal1.is_shutdown());
        assert!(signal2.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_recv_completes_when_triggered() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("recv should complete");
    }

    #[tokio::test]
    async fn test_shutdown_recv_after_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .expect("recv should complete immediately");
    }

    #[test]
    fn test_shutdown_recv_pending_until_triggered() {
        let signal = ShutdownSignal::new();
        let mut recv = tokio_test::task::spawn(signal.recv());
        tokio_test::assert_pending!(recv.poll());

        signal.trigger();
        assert!(recv.is_woken());
        tokio_test::assert_ready!(recv.poll());
    }

    #[test]
    fn test_wait_for_idle_pending_while_tokens_live() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        let mut idle = tokio_test::task::spawn(tracker.wait_for_idle());
        tokio_test::assert_pending!(idle.poll());

        drop(token);
        assert!(idle.is_woken());
        tokio_test::assert_ready!(idle.poll());
    }

    #[test]
    fn test_connection_tracker_counts_tokens() {
        let tracker = ConnectionTracker::new();
        let token1 = tracker.acquire();
        let token2 = tracker.acquire();
        assert_eq!(tracker.active_connections(), 2);

        drop(token1);
        assert_eq!(tracker.active_connections(), 1);

        drop(token2);
        assert_eq!(tracker.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_idle_immediate() {
        let tracker = ConnectionTracker::new();

        tokio::time::timeout(Duration::from_millis(10), tracker.wait_for_idle())
            .await
            .expect("wait_for_idle should complete immediately");
    }

    #[tokio::test]
    async fn test_wait_for_idle_after_last_token() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        let waiter = tracker.clone();
        let wait_handle = tokio::spawn(async move { waiter.wait_for_idle().await });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), wait_handle)
            .await
            .expect("wait should complete")
            .expect("task should not panic");
    }
}
