//! Observability for Switchyard.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: a Prometheus recorder behind the `metrics` facade the
//!   engine's stats tracker emits through
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                switchyard-ws                  │
//! │   tracing::info!/debug!      counter!/gauge!  │
//! └────────────┬──────────────────────┬───────────┘
//!              │                      │
//! ┌────────────┼──────────────────────┼───────────┐
//! │            ▼  switchyard-telemetry ▼           │
//! │     ┌─────────────┐        ┌─────────────┐    │
//! │     │   Logging   │        │   Metrics   │    │
//! │     │ (JSON/pretty)│       │ (Prometheus)│    │
//! │     └──────┬──────┘        └──────┬──────┘    │
//! └────────────┼──────────────────────┼───────────┘
//!              ▼                      ▼
//!        ┌──────────┐          ┌──────────┐
//!        │ stdout   │          │ /metrics │
//!        └──────────┘          └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use switchyard_telemetry::{init_telemetry, ServiceIdentity, TelemetryConfig};
//!
//! let config = TelemetryConfig::new(ServiceIdentity::new("chat", "production"));
//!
//! let metrics = init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{ServiceIdentity, TelemetryConfig};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Validates `config`, then initializes logging and metrics.
///
/// Returns the metrics registry when metrics are enabled.
///
/// # Errors
///
/// Returns `TelemetryError` if the config is invalid or either subsystem
/// fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    config.validate()?;
    init_logging(&config.logging)?;
    let registry = init_metrics(&config.metrics)?;

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        environment = %config.service.environment,
        metrics = registry.is_some(),
        "telemetry initialized"
    );

    Ok(registry)
}
