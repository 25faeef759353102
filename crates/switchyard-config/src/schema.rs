//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections and how
//! each one converts into the runtime type of the crate that consumes it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_telemetry::{
    LogConfig, MetricsConfig as RuntimeMetricsConfig, ServiceIdentity, TelemetryConfig,
};
use switchyard_ws::{OriginPolicy, WsConfig};

use crate::ConfigError;

/// Server configuration section.
///
/// Controls the listener in front of the WebSocket engine.
///
/// # Example
///
/// ```
/// use switchyard_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "127.0.0.1:9000".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.shutdown_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// How long shutdown waits for connections to drain, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Path answered with `200 OK` for liveness checks.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            health_path: default_health_path(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// WebSocket engine section.
///
/// Every duration is in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebSocketConfig {
    /// Paths the default connection handler mounts on.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Heartbeat sweep interval.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// How long a connection may go without a pong.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Maximum simultaneous open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum frame or reassembled message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Origin rules; `*` globs, `regex:` prefixes a regular expression.
    /// Empty allows every origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Supported sub-protocols.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Closing handshake timeout.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    /// How long a rejected stream stays open for its response to flush.
    #[serde(default = "default_reject_grace")]
    pub reject_grace_ms: u64,

    /// Outgoing frame queue capacity per connection.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Accept unmasked client frames.
    #[serde(default)]
    pub accept_unmasked_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            pong_timeout_ms: default_pong_timeout(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            allowed_origins: Vec::new(),
            protocols: Vec::new(),
            close_timeout_ms: default_close_timeout(),
            reject_grace_ms: default_reject_grace(),
            send_queue_capacity: default_send_queue_capacity(),
            accept_unmasked_frames: false,
        }
    }
}

impl WebSocketConfig {
    /// Converts into the engine's runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if an origin rule is not a valid
    /// pattern.
    pub fn to_ws_config(&self) -> Result<WsConfig, ConfigError> {
        let origins = OriginPolicy::from_strings(&self.allowed_origins)
            .map_err(|e| {
                ConfigError::invalid_value(
                    "websocket.allowed_origins",
                    self.allowed_origins.join(","),
                    e.to_string(),
                )
            })?;

        let mut config = WsConfig::new()
            .heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .pong_timeout(Duration::from_millis(self.pong_timeout_ms))
            .max_connections(self.max_connections)
            .max_message_size(self.max_message_size)
            .allow_origins(origins)
            .close_timeout(Duration::from_millis(self.close_timeout_ms))
            .reject_grace(Duration::from_millis(self.reject_grace_ms))
            .send_queue_capacity(self.send_queue_capacity)
            .accept_unmasked_frames(self.accept_unmasked_frames);
        for path in &self.paths {
            config = config.path(path.clone());
        }
        for protocol in &self.protocols {
            config = config.protocol(protocol.clone());
        }
        Ok(config)
    }
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_pong_timeout() -> u64 {
    45_000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_close_timeout() -> u64 {
    5_000
}

fn default_reject_grace() -> u64 {
    100
}

fn default_send_queue_capacity() -> usize {
    1024
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus recorder and endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP path the server exposes metrics on.
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_metrics_endpoint(),
        }
    }
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Log span open and close events.
    #[serde(default)]
    pub span_events: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            span_events: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for telemetry identification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Service version.
    #[serde(default)]
    pub service_version: Option<String>,

    /// Deployment environment (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: None,
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts into the telemetry crate's runtime configuration.
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        let logging = LogConfig {
            enabled: self.logging.enabled,
            level: self.logging.level.clone(),
            json_format: self.logging.format == LogFormat::Json,
            span_events: self.logging.span_events,
            file_line_info: self.logging.include_location,
            ..LogConfig::default()
        };
        let metrics = RuntimeMetricsConfig {
            enabled: self.metrics.enabled,
            endpoint: self.metrics.endpoint.clone(),
            ..RuntimeMetricsConfig::default()
        };

        let mut service = ServiceIdentity::new(&self.service_name, &self.environment);
        if let Some(version) = &self.service_version {
            service = service.with_version(version);
        }
        TelemetryConfig::new(service)
            .with_logging(logging)
            .with_metrics(metrics)
    }
}

fn default_service_name() -> String {
    "switchyard".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}
