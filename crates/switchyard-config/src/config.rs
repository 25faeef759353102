//! Main configuration types.
//!
//! This module provides the top-level [`SwitchyardConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogFormat, ServerConfig, TelemetryConfigSection, WebSocketConfig};

/// Complete Switchyard server configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use switchyard_config::SwitchyardConfig;
///
/// let config = SwitchyardConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SwitchyardConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// WebSocket engine configuration.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl SwitchyardConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SwitchyardConfigBuilder {
        SwitchyardConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                &self.server.http_addr,
                "not a socket address",
            ));
        }

        if !self.server.health_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.health_path",
                &self.server.health_path,
                "must start with '/'",
            ));
        }

        let ws = &self.websocket;
        if let Some(path) = ws.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::invalid_value(
                "websocket.paths",
                path,
                "every path must start with '/'",
            ));
        }

        for (field, value) in [
            ("websocket.heartbeat_interval_ms", ws.heartbeat_interval_ms),
            ("websocket.pong_timeout_ms", ws.pong_timeout_ms),
            ("websocket.close_timeout_ms", ws.close_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, value, "must be positive"));
            }
        }

        for (field, value) in [
            ("websocket.max_connections", ws.max_connections),
            ("websocket.max_message_size", ws.max_message_size),
            ("websocket.send_queue_capacity", ws.send_queue_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, value, "must be positive"));
            }
        }

        ws.to_ws_config()?;

        let metrics = &self.telemetry.metrics;
        if metrics.enabled && !metrics.endpoint.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.endpoint",
                &metrics.endpoint,
                "must start with '/'",
            ));
        }
        if metrics.enabled && metrics.endpoint == self.server.health_path {
            return Err(ConfigError::Conflict {
                first: "telemetry.metrics.endpoint",
                second: "server.health_path",
                value: metrics.endpoint.clone(),
            });
        }

        if let Err(e) = switchyard_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
        {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                &self.telemetry.logging.level,
                e.to_string(),
            ));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs with source locations.
    ///
    /// # Example
    ///
    /// ```
    /// use switchyard_config::SwitchyardConfig;
    ///
    /// let config = SwitchyardConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.server.http_addr = "127.0.0.1:8080".to_string();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.span_events = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.environment = "development".to_string();

        config
    }

    /// Production preset: JSON logs at info level.
    ///
    /// # Example
    ///
    /// ```
    /// use switchyard_config::SwitchyardConfig;
    ///
    /// let config = SwitchyardConfig::production();
    /// assert_eq!(config.telemetry.logging.format, switchyard_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config
    }
}

/// Builder for [`SwitchyardConfig`].
#[derive(Debug, Default)]
pub struct SwitchyardConfigBuilder {
    server: Option<ServerConfig>,
    websocket: Option<WebSocketConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl SwitchyardConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub fn websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = Some(websocket);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> SwitchyardConfig {
        SwitchyardConfig {
            server: self.server.unwrap_or_default(),
            websocket: self.websocket.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<SwitchyardConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
