//! Server configuration types.
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("127.0.0.1:8080")
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "127.0.0.1:8080");
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use switchyard_config::SwitchyardConfig;

/// Default bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default health check path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances, or
/// [`ServerConfig::from_config`] to derive one from a loaded
/// [`SwitchyardConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    http_addr: String,
    shutdown_timeout: Duration,
    health_path: String,
    metrics_path: Option<String>,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Derives the listener configuration from a loaded configuration.
    ///
    /// The metrics path is set only when metrics are enabled.
    #[must_use]
    pub fn from_config(config: &SwitchyardConfig) -> Self {
        let metrics = &config.telemetry.metrics;
        Self::builder()
            .http_addr(config.server.http_addr.clone())
            .shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout_secs))
            .health_path(config.server.health_path.clone())
            .metrics_path(metrics.enabled.then(|| metrics.endpoint.clone()))
            .build()
    }

    /// Returns the bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// Returns how long shutdown waits for connections to drain.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the health check path.
    #[must_use]
    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// Returns the metrics path, if metrics are served.
    #[must_use]
    pub fn metrics_path(&self) -> Option<&str> {
        self.metrics_path.as_deref()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    health_path: String,
    metrics_path: Option<String>,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            metrics_path: None,
        }
    }

    /// Sets the bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the shutdown drain timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the health check path.
    #[must_use]
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Sets the metrics path; `None` disables the endpoint.
    #[must_use]
    pub fn metrics_path(mut self, path: Option<String>) -> Self {
        self.metrics_path = path;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            health_path: self.health_path,
            metrics_path: self.metrics_path,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
