//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{ConfigError, LogFormat, SwitchyardConfig};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values or a preset
/// 2. Configuration files and strings (TOML or JSON), merged key by key
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use switchyard_config::ConfigLoader;
///
/// # fn main() -> Result<(), switchyard_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("switchyard.toml")?
///     .with_env_prefix("SWITCHYARD")
///     .load()?;
///
/// println!("listening on {}", config.server.http_addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: SwitchyardConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SwitchyardConfig::default(),
            env_prefix: None,
        }
    }

    /// Start over from default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = SwitchyardConfig::default();
        self
    }

    /// Start over from the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use switchyard_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = SwitchyardConfig::development();
        self
    }

    /// Start over from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = SwitchyardConfig::production();
        self
    }

    /// Merge a configuration file.
    ///
    /// The format is chosen by extension: `.toml` or `.json`. Keys the file
    /// sets override the current layer; keys it omits keep their values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::missing_file(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::unreadable(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some(format @ ("toml" | "json")) => self.with_string(&content, format),
            other => Err(ConfigError::unsupported_format(other.unwrap_or("(none)"))),
        }
    }

    /// Merge a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration from a string in `format` (`"toml"` or `"json"`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the content has unknown fields.
    ///
    /// # Example
    ///
    /// ```
    /// use switchyard_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [websocket]
    ///     heartbeat_interval_ms = 10000
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.websocket.heartbeat_interval_ms, 10000);
    /// assert_eq!(config.websocket.pong_timeout_ms, 45000);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer: Value = match format.to_lowercase().as_str() {
            "toml" => serde_json::to_value(toml::from_str::<toml::Value>(content)?)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::unsupported_format(format)),
        };

        let mut merged = serde_json::to_value(&self.config).map_err(ConfigError::Schema)?;
        merge_values(&mut merged, layer);
        self.config = serde_json::from_value(merged).map_err(ConfigError::Schema)?;
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "SWITCHYARD":
    /// - `SWITCHYARD__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `SWITCHYARD__WEBSOCKET__ALLOWED_ORIGINS=https://a.example,*.b.example`
    /// - `SWITCHYARD__TELEMETRY__LOGGING__LEVEL=debug`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Environment variable parsing fails
    /// - Configuration validation fails
    pub fn load(self) -> Result<SwitchyardConfig, ConfigError> {
        let config = self.resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides without validating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed.
    pub fn load_unvalidated(self) -> Result<SwitchyardConfig, ConfigError> {
        self.resolve()
    }

    fn resolve(mut self) -> Result<SwitchyardConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let mut vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            vars.sort();

            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        Ok(self.config)
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();
        let server = &mut self.config.server;
        let ws = &mut self.config.websocket;
        let telemetry = &mut self.config.telemetry;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                server.shutdown_timeout_secs = parse_number(key, value)?;
            }
            ["SERVER", "HEALTH_PATH"] => server.health_path = value.to_string(),

            ["WEBSOCKET", "PATHS"] => ws.paths = parse_list(value),
            ["WEBSOCKET", "HEARTBEAT_INTERVAL_MS"] => {
                ws.heartbeat_interval_ms = parse_number(key, value)?;
            }
            ["WEBSOCKET", "PONG_TIMEOUT_MS"] => ws.pong_timeout_ms = parse_number(key, value)?,
            ["WEBSOCKET", "MAX_CONNECTIONS"] => ws.max_connections = parse_number(key, value)?,
            ["WEBSOCKET", "MAX_MESSAGE_SIZE"] => ws.max_message_size = parse_number(key, value)?,
            ["WEBSOCKET", "ALLOWED_ORIGINS"] => ws.allowed_origins = parse_list(value),
            ["WEBSOCKET", "PROTOCOLS"] => ws.protocols = parse_list(value),
            ["WEBSOCKET", "CLOSE_TIMEOUT_MS"] => ws.close_timeout_ms = parse_number(key, value)?,
            ["WEBSOCKET", "REJECT_GRACE_MS"] => ws.reject_grace_ms = parse_number(key, value)?,
            ["WEBSOCKET", "SEND_QUEUE_CAPACITY"] => {
                ws.send_queue_capacity = parse_number(key, value)?;
            }
            ["WEBSOCKET", "ACCEPT_UNMASKED_FRAMES"] => {
                ws.accept_unmasked_frames = parse_flag(key, value)?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
            ["TELEMETRY", "SERVICE_VERSION"] => {
                telemetry.service_version = (!value.is_empty()).then(|| value.to_string());
            }
            ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ENDPOINT"] => telemetry.metrics.endpoint = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_override(key, value, "`json` or `pretty`"))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "SPAN_EVENTS"] => {
                telemetry.logging.span_events = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                telemetry.logging.include_location = parse_flag(key, value)?;
            }

            _ => {}
        }

        Ok(())
    }
}

/// Recursively overlay `layer` onto `base`. Tables merge; everything else
/// replaces.
fn merge_values(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_override(key, value, "an integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_override(key, value, "a boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list, dropping empty items.
fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
