//! Errors raised while layering and validating Switchyard configuration.
//!
//! Every variant names where the bad input came from: a file path, an
//! environment variable, or the `section.key` path of a field.

use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file {} does not exist", path.display())]
    MissingFile {
        /// Path that was requested.
        path: PathBuf,
    },

    /// A config file exists but could not be read.
    #[error("cannot read config file {}", path.display())]
    Unreadable {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A layer is neither TOML nor JSON.
    #[error("unsupported config format `{format}` (expected toml or json)")]
    UnsupportedFormat {
        /// The extension or format name that was given.
        format: String,
    },

    /// A TOML layer is not well-formed.
    #[error("malformed TOML layer: {0}")]
    Toml(#[from] toml::de::Error),

    /// A JSON layer is not well-formed.
    #[error("malformed JSON layer: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-formed layer has unknown keys or values of the wrong type.
    #[error("layer does not match the switchyard schema: {0}")]
    Schema(#[source] serde_json::Error),

    /// A `.env` file exists but could not be parsed.
    #[error("cannot load .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),

    /// A field holds a value the engine cannot run with.
    #[error("{key} = {value}: {reason}")]
    InvalidValue {
        /// Dotted path of the field, e.g. `websocket.pong_timeout_ms`.
        key: &'static str,
        /// The offending value, as configured.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An environment override could not be parsed for its field.
    #[error("{var}={value:?}: expected {expected}")]
    EnvOverride {
        /// Full variable name, e.g. `SWITCHYARD__WEBSOCKET__MAX_CONNECTIONS`.
        var: String,
        /// The raw value.
        value: String,
        /// What the field accepts.
        expected: &'static str,
    },

    /// Two fields that must differ were given the same value.
    #[error("{first} and {second} are both {value}")]
    Conflict {
        /// Dotted path of the first field.
        first: &'static str,
        /// Dotted path of the second field.
        second: &'static str,
        /// The shared value.
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub(crate) fn invalid_value(
        key: &'static str,
        value: impl Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_override(
        var: impl Into<String>,
        value: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::EnvOverride {
            var: var.into(),
            value: value.into(),
            expected,
        }
    }

    /// Dotted path of the offending field, when the error is about one.
    #[must_use]
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            Self::Conflict { first, .. } => Some(*first),
            _ => None,
        }
    }
}
