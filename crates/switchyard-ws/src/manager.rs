//! Tracking of open connections.
//!
//! The [`ConnectionManager`] holds every open connection keyed by id and
//! enforces the connection limit. A slot is reserved atomically before the
//! handshake is written, as a [`CapacityPermit`]; the permit is either
//! converted into a tracked connection or released when dropped, so a failed
//! upgrade never leaks capacity.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{WsError, WsResult};

/// Statistics about tracked connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Connections currently tracked.
    pub active_connections: usize,
    /// Slots reserved (tracked plus upgrades in flight).
    pub reserved_slots: usize,
    /// Configured maximum.
    pub max_connections: usize,
    /// Total connections ever tracked.
    pub total_accepted: usize,
    /// Total reservations refused.
    pub total_rejected: usize,
    /// Total connections removed.
    pub total_closed: usize,
}

/// The set of open connections for one engine instance.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Tracked connections.
    connections: DashMap<ConnectionId, Connection>,
    /// Maximum simultaneous connections.
    max_connections: usize,
    /// Reserved slots, including upgrades that have not completed yet.
    reserved: AtomicUsize,
    /// Total connections tracked.
    total_accepted: AtomicUsize,
    /// Total reservations refused.
    total_rejected: AtomicUsize,
    /// Total connections removed.
    total_closed: AtomicUsize,
    /// Whether shutdown has been triggered.
    is_shutdown: AtomicBool,
}

/// A reserved connection slot. Released on drop unless tracked.
#[derive(Debug)]
pub struct CapacityPermit {
    manager: Arc<ConnectionManager>,
    armed: bool,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        if self.armed {
            self.manager.reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl ConnectionManager {
    /// Create a manager allowing up to `max_connections` open connections.
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            max_connections,
            reserved: AtomicUsize::new(0),
            total_accepted: AtomicUsize::new(0),
            total_rejected: AtomicUsize::new(0),
            total_closed: AtomicUsize::new(0),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Get the configured maximum.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Reserve a slot for an upgrade in progress.
    pub fn reserve(self: &Arc<Self>) -> WsResult<CapacityPermit> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WsError::capacity_exceeded(self.max_connections));
        }

        let max = self.max_connections;
        let reserved = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            });

        match reserved {
            Ok(_) => Ok(CapacityPermit {
                manager: Arc::clone(self),
                armed: true,
            }),
            Err(current) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(current, max, "Connection limit reached");
                Err(WsError::capacity_exceeded(max))
            }
        }
    }

    /// Track `conn`, consuming the permit. The slot is held until [`remove`].
    ///
    /// [`remove`]: ConnectionManager::remove
    pub fn track(&self, mut permit: CapacityPermit, conn: &Connection) {
        permit.armed = false;
        self.connections.insert(conn.id(), conn.clone());
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = %conn.id(),
            total = self.connections.len(),
            "Connection tracked"
        );
    }

    /// Stop tracking a connection and release its slot.
    pub fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = %id, "Connection removed");
        }
        removed
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.get(id).map(|e| e.value().clone())
    }

    /// Check if a connection is tracked.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All tracked connection IDs.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot of all tracked connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Get statistics about tracked connections.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_connections: self.connections.len(),
            reserved_slots: self.reserved.load(Ordering::Acquire),
            max_connections: self.max_connections,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Refuse new reservations and terminate every tracked connection.
    ///
    /// Returns the number of connections that were closed.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        self.is_shutdown.store(true, Ordering::SeqCst);

        // Collect first; teardown removes entries from the map.
        let connections = self.connections();
        let count = connections.len();
        if count > 0 {
            info!(connections = count, code, "Closing all connections");
        }
        for conn in connections {
            conn.terminate(code, reason);
        }
        count
    }
}
