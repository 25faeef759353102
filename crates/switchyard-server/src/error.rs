//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that stop the server from running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address does not parse.
    #[error("invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Why it did not parse.
        reason: String,
    },

    /// Binding the listener failed.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::InvalidAddress {
            addr: "localhost".to_string(),
            reason: "invalid socket address syntax".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid address 'localhost': invalid socket address syntax"
        );

        let err = ServerError::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("127.0.0.1:80"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
