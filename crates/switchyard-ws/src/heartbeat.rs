//! Liveness supervision.
//!
//! Every heartbeat interval the supervisor sweeps its tracked connections.
//! A connection whose peer has not answered within the pong timeout is
//! terminated with 1001; every other open connection is marked unresponsive
//! and pinged, and its next pong marks it alive again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId, ReadyState};
use crate::error::CloseCode;

/// Close reason sent to connections evicted for missing pongs.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were pinged.
    pub pinged: usize,
    /// Connections that were terminated.
    pub evicted: usize,
}

/// Periodic ping/pong supervisor for one engine instance.
#[derive(Debug)]
pub struct HeartbeatSupervisor {
    tracked: DashMap<ConnectionId, Connection>,
    interval: Duration,
    pong_timeout: Duration,
    running: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSupervisor {
    /// Create a supervisor. Nothing runs until [`start`](Self::start).
    pub fn new(interval: Duration, pong_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            tracked: DashMap::new(),
            interval,
            pong_timeout,
            running: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            loop_handle: Mutex::new(None),
        })
    }

    /// Add a connection to the heartbeat set.
    pub fn track(&self, conn: &Connection) {
        self.tracked.insert(conn.id(), conn.clone());
    }

    /// Remove a connection from the heartbeat set.
    pub fn untrack(&self, id: &ConnectionId) {
        self.tracked.remove(id);
    }

    /// Whether a connection is in the heartbeat set.
    pub fn is_tracking(&self, id: &ConnectionId) -> bool {
        self.tracked.contains_key(id)
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Check if no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Whether the periodic loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        // Snapshot first; terminating a connection untracks it.
        let connections: Vec<Connection> =
            self.tracked.iter().map(|e| e.value().clone()).collect();

        let mut report = SweepReport::default();
        for conn in connections {
            if conn.ready_state() != ReadyState::Open {
                continue;
            }
            let silent_for = now.saturating_duration_since(conn.last_pong());
            if silent_for > self.pong_timeout {
                debug!(
                    connection_id = %conn.id(),
                    silent_ms = silent_for.as_millis() as u64,
                    "Evicting unresponsive connection"
                );
                conn.terminate(CloseCode::GoingAway, HEARTBEAT_TIMEOUT_REASON);
                self.untrack(&conn.id());
                report.evicted += 1;
            } else {
                conn.mark_unresponsive();
                if conn.ping(bytes::Bytes::new()).is_ok() {
                    report.pinged += 1;
                }
            }
        }

        if report.evicted > 0 {
            info!(evicted = report.evicted, pinged = report.pinged, "Heartbeat sweep");
        }
        report
    }

    /// Start the periodic sweep loop. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let supervisor: Weak<Self> = Arc::downgrade(self);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(supervisor) = supervisor.upgrade() else {
                            break;
                        };
                        supervisor.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat supervisor received shutdown signal");
                        break;
                    }
                }
            }
        });

        *self.loop_handle.lock() = Some(handle);
        debug!(interval_ms = period.as_millis() as u64, "Heartbeat supervisor started");
    }

    /// Stop the periodic sweep loop and wait for it to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        debug!("Heartbeat supervisor stopped");
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.get_mut().take() {
            let _ = tx.try_send(());
        }
    }
}
