//! Prometheus metrics for Switchyard.
//!
//! The engine's [`StatsTracker`](switchyard_ws::StatsTracker) emits through
//! the `metrics` facade on every event. This module installs the Prometheus
//! recorder behind that facade and renders the exposition text the server
//! serves on its metrics endpoint.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `switchyard_ws_connections_accepted_total` | Counter | - | Upgrades completed |
//! | `switchyard_ws_connections_closed_total` | Counter | `code` | Connections closed |
//! | `switchyard_ws_connections_active` | Gauge | - | Open connections |
//! | `switchyard_ws_rejections_total` | Counter | `status` | Upgrades refused |
//! | `switchyard_ws_messages_received_total` | Counter | - | Messages delivered to handlers |
//! | `switchyard_ws_messages_sent_total` | Counter | - | Messages queued to peers |
//! | `switchyard_ws_bytes_received_total` | Counter | - | Payload bytes received |
//! | `switchyard_ws_bytes_sent_total` | Counter | - | Payload bytes sent |
//! | `switchyard_ws_errors_total` | Counter | `kind` | Protocol, stream and handler errors |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use switchyard_ws::stats::names;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// HTTP path the server exposes metrics on.
    pub endpoint: String,

    /// Value of the `service` label attached to every metric.
    pub service_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
            service_name: "switchyard".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Checks the endpoint is an absolute path.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` otherwise.
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.enabled && !self.endpoint.starts_with('/') {
            return Err(TelemetryError::InvalidConfig(format!(
                "metrics endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Renders the installed recorder's metrics.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps a Prometheus handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// The registry backed by the global recorder, if [`init_metrics`] ran.
    #[must_use]
    pub fn global() -> Option<Self> {
        METRICS_HANDLE.get().cloned().map(Self::new)
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// Returns `None` when metrics are disabled.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a global recorder is already
/// installed, or `TelemetryError::InvalidConfig` for a bad endpoint.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }
    config.validate()?;

    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle.clone());
    describe_metrics();

    Ok(Some(MetricsRegistry::new(handle)))
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers help text for every engine metric with the current recorder.
pub fn describe_metrics() {
    describe_counter!(
        names::CONNECTIONS_ACCEPTED,
        "Total number of WebSocket upgrades completed"
    );
    describe_counter!(
        names::CONNECTIONS_CLOSED,
        "Total number of WebSocket connections closed, by close code"
    );
    describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Number of WebSocket connections currently open"
    );
    describe_counter!(
        names::REJECTIONS,
        "Total number of upgrade requests refused, by HTTP status"
    );
    describe_counter!(
        names::MESSAGES_RECEIVED,
        "Total number of messages delivered to handlers"
    );
    describe_counter!(
        names::MESSAGES_SENT,
        "Total number of messages queued to peers"
    );
    describe_counter!(
        names::BYTES_RECEIVED,
        "Total message payload bytes received"
    );
    describe_counter!(names::BYTES_SENT, "Total message payload bytes sent");
    describe_counter!(
        names::ERRORS,
        "Total number of connection errors, by kind"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_ws::StatsTracker;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "/metrics");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_endpoint_is_invalid() {
        let config = MetricsConfig {
            endpoint: "metrics".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TelemetryError::InvalidConfig(_))
        ));

        let disabled = MetricsConfig {
            enabled: false,
            ..config
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_disabled_metrics() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).unwrap().is_none());
    }

    #[test]
    fn test_stats_render_as_prometheus() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            let stats = StatsTracker::new();
            stats.record_accepted();
            stats.record_rejection(403);
        });

        let output = MetricsRegistry::new(handle).render();
        assert!(output.contains("switchyard_ws_connections_accepted_total 1"));
        assert!(output.contains("switchyard_ws_rejections_total{status=\"403\"} 1"));
        assert!(output.contains("# HELP switchyard_ws_connections_active"));
    }
}
