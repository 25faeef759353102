//! Health check endpoint.
//!
//! The liveness check reports the service identity, uptime and how many
//! WebSocket connections are open.
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::HealthCheck;
//!
//! let health = HealthCheck::new("chat", "1.0.0");
//! let status = health.status(3);
//!
//! assert!(status.is_healthy());
//! assert_eq!(status.connections(), 3);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Health status response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// "healthy", or "draining" once shutdown began
    status: String,

    /// Service name
    service: String,

    /// Service version
    version: String,

    /// Server uptime in seconds
    uptime_seconds: u64,

    /// Open WebSocket connections
    connections: usize,
}

impl HealthStatus {
    /// Returns the status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    /// Returns the open connection count.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Returns true unless the server is draining.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Liveness check state.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    start_time: Instant,
    draining: Arc<AtomicBool>,
}

impl HealthCheck {
    /// Creates a health check reporting `service` at `version`.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            start_time: Instant::now(),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the current status with `connections` open.
    #[must_use]
    pub fn status(&self, connections: usize) -> HealthStatus {
        let status = if self.is_draining() {
            "draining"
        } else {
            "healthy"
        };
        HealthStatus {
            status: status.to_string(),
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.uptime().as_secs(),
            connections,
        }
    }

    /// Marks the server as shutting down.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Returns true once shutdown began.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Returns the server uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        let health = HealthCheck::new("chat", "1.2.3");
        let status = health.status(2);

        assert!(status.is_healthy());
        assert_eq!(status.service(), "chat");
        assert_eq!(status.version(), "1.2.3");
        assert_eq!(status.connections(), 2);
    }

    #[test]
    fn test_draining_is_shared_between_clones() {
        let health = HealthCheck::new("chat", "1.2.3");
        let clone = health.clone();

        clone.set_draining();
        assert!(health.is_draining());
        assert_eq!(health.status(0).status(), "draining");
        assert!(!health.status(0).is_healthy());
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthCheck::new("chat", "1.0.0").status(1);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "chat");
        assert_eq!(json["connections"], 1);
        assert!(json["uptime_seconds"].is_u64());
    }
}
