//! WebSocket engine configuration.
//!
//! This module defines the options that govern admission, framing limits,
//! liveness supervision and outgoing backpressure for a [`WsServer`].
//!
//! [`WsServer`]: crate::WsServer

use std::time::Duration;

use crate::origin::{OriginPolicy, OriginRule};

/// Configuration for the WebSocket engine.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Paths [`WsServer::on_connection`](crate::WsServer::on_connection) mounts on.
    pub paths: Vec<String>,
    /// How often the heartbeat supervisor sweeps (default: 30 seconds).
    pub heartbeat_interval: Duration,
    /// How long a connection may go without a pong (default: 45 seconds).
    pub pong_timeout: Duration,
    /// Maximum simultaneous open connections (default: 10000).
    pub max_connections: usize,
    /// Maximum frame or reassembled message size in bytes (default: 1 MiB).
    pub max_message_size: usize,
    /// Origins allowed to connect; empty allows all.
    pub allow_origins: OriginPolicy,
    /// Sub-protocols the server supports, in no particular order.
    pub protocols: Vec<String>,
    /// How long a closing handshake may take before the stream is released (default: 5 seconds).
    pub close_timeout: Duration,
    /// How long a rejected stream is kept open so the response can flush (default: 100 ms).
    pub reject_grace: Duration,
    /// Capacity of each connection's outgoing frame queue (default: 1024).
    pub send_queue_capacity: usize,
    /// Whether to accept unmasked frames from clients (default: false).
    pub accept_unmasked_frames: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(45),
            max_connections: 10_000,
            max_message_size: 1024 * 1024, // 1 MiB
            allow_origins: OriginPolicy::allow_all(),
            protocols: Vec::new(),
            close_timeout: Duration::from_secs(5),
            reject_grace: Duration::from_millis(100),
            send_queue_capacity: 1024,
            accept_unmasked_frames: false,
        }
    }
}

impl WsConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path for `on_connection` to mount on.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the pong timeout.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Set the maximum number of open connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Allow an exact origin (case-insensitive).
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origins
            .push(OriginRule::Exact(origin.into().to_ascii_lowercase()));
        self
    }

    /// Allow origins matching a rule.
    pub fn allow_origin_rule(mut self, rule: OriginRule) -> Self {
        self.allow_origins.push(rule);
        self
    }

    /// Replace the origin policy.
    pub fn allow_origins(mut self, policy: OriginPolicy) -> Self {
        self.allow_origins = policy;
        self
    }

    /// Add a supported sub-protocol.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Set the closing handshake timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the grace delay before a rejected stream is destroyed.
    pub fn reject_grace(mut self, grace: Duration) -> Self {
        self.reject_grace = grace;
        self
    }

    /// Set the outgoing queue capacity in frames.
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Set whether to accept unmasked frames from clients.
    pub fn accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }
}
