//! Telemetry configuration.
//!
//! A [`TelemetryConfig`] is built around the [`ServiceIdentity`] of the
//! running server. The identity's name becomes the `service` label on every
//! metric, and all three identity fields go on the startup log event.

use crate::error::TelemetryError;
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::TelemetryResult;

/// Environment name that selects production logging.
pub const PRODUCTION: &str = "production";

/// Name, version and deployment environment of a Switchyard process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service name, e.g. `chat`.
    pub name: String,
    /// Build version reported at startup.
    pub version: String,
    /// Deployment environment, e.g. `development` or `production`.
    pub environment: String,
}

impl ServiceIdentity {
    /// Identity for `name` in `environment`, at this crate's version.
    #[must_use]
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.into(),
        }
    }

    /// Overrides the reported version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Whether this process runs in production.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION)
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::new("switchyard", "development")
    }
}

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Who is emitting.
    pub service: ServiceIdentity,

    /// Prometheus recorder settings. `service_name` always equals
    /// `service.name`.
    pub metrics: MetricsConfig,

    /// Log subscriber settings.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Telemetry for `service`, with the log preset its environment implies.
    ///
    /// Production gets JSON at `info`; anything else gets pretty `debug`
    /// output with source locations.
    #[must_use]
    pub fn new(service: ServiceIdentity) -> Self {
        let logging = if service.is_production() {
            LogConfig::production()
        } else {
            LogConfig::development()
        };
        let metrics = MetricsConfig {
            service_name: service.name.clone(),
            ..MetricsConfig::default()
        };
        Self {
            service,
            metrics,
            logging,
        }
    }

    /// Replaces the log settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Replaces the metrics settings, keeping the `service` label in step
    /// with the identity.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = MetricsConfig {
            service_name: self.service.name.clone(),
            ..metrics
        };
        self
    }

    /// Turns metrics off.
    #[must_use]
    pub fn without_metrics(mut self) -> Self {
        self.metrics.enabled = false;
        self
    }

    /// Checks the identity can label metrics and the metrics endpoint is
    /// routable.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> TelemetryResult<()> {
        for (field, value) in [
            ("service name", &self.service.name),
            ("environment", &self.service.environment),
        ] {
            if value.trim().is_empty() {
                return Err(TelemetryError::InvalidConfig(format!("{field} is empty")));
            }
            if value.chars().any(char::is_control) {
                return Err(TelemetryError::InvalidConfig(format!(
                    "{field} contains control characters: {value:?}"
                )));
            }
        }
        self.metrics.validate()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new(ServiceIdentity::default())
    }
}
