//! Engine counters.
//!
//! The [`StatsTracker`] keeps cheap atomic counters for diagnostics and
//! mirrors every update to the `metrics` facade, so an installed recorder
//! (Prometheus, in the server binary) exports them as well. The counters are
//! derived data: the connection tracker and room registry remain the source
//! of truth for who is connected.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `switchyard_ws_connections_accepted_total` | Counter | - |
//! | `switchyard_ws_connections_closed_total` | Counter | `code` |
//! | `switchyard_ws_connections_active` | Gauge | - |
//! | `switchyard_ws_rejections_total` | Counter | `status` |
//! | `switchyard_ws_messages_received_total` | Counter | - |
//! | `switchyard_ws_messages_sent_total` | Counter | - |
//! | `switchyard_ws_bytes_received_total` | Counter | - |
//! | `switchyard_ws_bytes_sent_total` | Counter | - |
//! | `switchyard_ws_errors_total` | Counter | `kind` |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;

/// Metric names emitted by the engine.
pub mod names {
    /// Connections that completed the handshake.
    pub const CONNECTIONS_ACCEPTED: &str = "switchyard_ws_connections_accepted_total";
    /// Connections that reached CLOSED.
    pub const CONNECTIONS_CLOSED: &str = "switchyard_ws_connections_closed_total";
    /// Currently open connections.
    pub const CONNECTIONS_ACTIVE: &str = "switchyard_ws_connections_active";
    /// Upgrade requests rejected before a connection existed.
    pub const REJECTIONS: &str = "switchyard_ws_rejections_total";
    /// Complete data messages received.
    pub const MESSAGES_RECEIVED: &str = "switchyard_ws_messages_received_total";
    /// Data messages written to the wire.
    pub const MESSAGES_SENT: &str = "switchyard_ws_messages_sent_total";
    /// Frame bytes read from the wire.
    pub const BYTES_RECEIVED: &str = "switchyard_ws_bytes_received_total";
    /// Frame bytes written to the wire.
    pub const BYTES_SENT: &str = "switchyard_ws_bytes_sent_total";
    /// Protocol violations and stream errors.
    pub const ERRORS: &str = "switchyard_ws_errors_total";
}

/// Kind label for [`names::ERRORS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer violated the framing protocol.
    Protocol,
    /// The stream failed or was reset.
    Stream,
    /// A handler or middleware failed.
    Handler,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Stream => "stream",
            Self::Handler => "handler",
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections that completed the handshake.
    pub connections_accepted: u64,
    /// Connections currently open.
    pub connections_active: u64,
    /// Connections that reached CLOSED.
    pub connections_closed: u64,
    /// Rejections keyed by HTTP status.
    pub rejections: BTreeMap<u16, u64>,
    /// Complete data messages received.
    pub messages_received: u64,
    /// Data messages written to the wire.
    pub messages_sent: u64,
    /// Frame bytes read.
    pub bytes_received: u64,
    /// Frame bytes written.
    pub bytes_sent: u64,
    /// Protocol violations.
    pub protocol_errors: u64,
    /// Stream errors.
    pub stream_errors: u64,
    /// Handler and middleware failures.
    pub handler_errors: u64,
}

impl StatsSnapshot {
    /// Total rejections across all statuses.
    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Atomic counters for one engine instance.
#[derive(Debug, Default)]
pub struct StatsTracker {
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    connections_closed: AtomicU64,
    rejections: Mutex<BTreeMap<u16, u64>>,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    protocol_errors: AtomicU64,
    stream_errors: AtomicU64,
    handler_errors: AtomicU64,
}

impl StatsTracker {
    /// Create a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection completed the handshake.
    pub fn record_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        let active = self.connections_active.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(names::CONNECTIONS_ACCEPTED).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).set(active as f64);
    }

    /// A connection reached CLOSED with `code`.
    pub fn record_closed(&self, code: u16) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        let active = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .map_or(0, |prev| prev.saturating_sub(1));
        counter!(names::CONNECTIONS_CLOSED, "code" => code.to_string()).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).set(active as f64);
    }

    /// An upgrade was rejected with `status`.
    pub fn record_rejection(&self, status: u16) {
        *self.rejections.lock().entry(status).or_insert(0) += 1;
        counter!(names::REJECTIONS, "status" => status.to_string()).increment(1);
    }

    /// A complete data message was received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!(names::MESSAGES_RECEIVED).increment(1);
    }

    /// A data message was written.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        counter!(names::MESSAGES_SENT).increment(1);
    }

    /// Frame bytes were read.
    pub fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        counter!(names::BYTES_RECEIVED).increment(bytes as u64);
    }

    /// Frame bytes were written.
    pub fn record_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        counter!(names::BYTES_SENT).increment(bytes as u64);
    }

    /// An error of `kind` occurred on an open connection.
    pub fn record_error(&self, kind: ErrorKind) {
        let slot = match kind {
            ErrorKind::Protocol => &self.protocol_errors,
            ErrorKind::Stream => &self.stream_errors,
            ErrorKind::Handler => &self.handler_errors,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(names::ERRORS, "kind" => kind.as_str()).increment(1);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            rejections: self.rejections.lock().clone(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}
