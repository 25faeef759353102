//! Typed configuration for Switchyard.
//!
//! This crate provides a strongly-typed configuration system for Switchyard
//! servers with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → files → env)
//!
//! # Overview
//!
//! [`SwitchyardConfig`] holds three sections, each convertible into the
//! runtime configuration of the crate that consumes it:
//!
//! - [`ServerConfig`] - listener settings (address, shutdown timeout)
//! - [`WebSocketConfig`] - engine settings, see [`WebSocketConfig::to_ws_config`]
//! - [`TelemetryConfigSection`] - metrics and logging, see
//!   [`TelemetryConfigSection::to_telemetry_config`]
//!
//! # Example
//!
//! ```no_run
//! use switchyard_config::ConfigLoader;
//!
//! # fn main() -> Result<(), switchyard_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("switchyard.toml")?
//!     .with_env_prefix("SWITCHYARD")
//!     .load()?;
//!
//! let ws = config.websocket.to_ws_config()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! health_path = "/health"
//!
//! [websocket]
//! paths = ["/chat/*"]
//! heartbeat_interval_ms = 30000
//! pong_timeout_ms = 45000
//! max_connections = 10000
//! max_message_size = 1048576
//! allowed_origins = ["https://app.example", "*.trusted.example"]
//! protocols = ["chat.v1"]
//!
//! [telemetry]
//! service_name = "chat"
//! environment = "production"
//!
//! [telemetry.metrics]
//! enabled = true
//! endpoint = "/metrics"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables; lists are
//! comma-separated:
//!
//! - `SWITCHYARD__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `SWITCHYARD__WEBSOCKET__PROTOCOLS=chat.v2,chat.v1`
//! - `SWITCHYARD__TELEMETRY__METRICS__ENABLED=false`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
