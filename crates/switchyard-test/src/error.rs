//! Test client error types.

use std::io;

use thiserror::Error;

/// Errors that can occur while driving a test client.
#[derive(Debug, Error)]
pub enum TestClientError {
    /// Request building failed
    #[error("Request build error: {0}")]
    RequestBuild(String),

    /// The handshake response could not be parsed
    #[error("Malformed handshake response: {0}")]
    MalformedResponse(String),

    /// The server answered with something other than `101`
    #[error("Upgrade rejected with status {0}")]
    Rejected(u16),

    /// The server sent a frame the client could not decode
    #[error("Frame error: {0}")]
    Frame(#[from] switchyard_ws::WsError),

    /// The stream ended before the expected data arrived
    #[error("Connection closed by server")]
    Eof,

    /// Nothing arrived within the receive timeout
    #[error("Timed out waiting for the server")]
    Timeout,

    /// A frame of an unexpected kind arrived
    #[error("Unexpected frame: {0}")]
    Unexpected(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stream I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for test client operations.
pub type TestResult<T> = Result<T, TestClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            TestClientError::Rejected(403).to_string(),
            "Upgrade rejected with status 403"
        );
        assert_eq!(TestClientError::Eof.to_string(), "Connection closed by server");
    }

    #[test]
    fn test_from_io() {
        let err: TestClientError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, TestClientError::Io(_)));
    }
}
