//! Error types for WebSocket operations.
//!
//! This module defines the errors that can occur while admitting an upgrade
//! request, decoding frames, and driving an established connection. Every
//! variant maps either to an HTTP status (admission failures, before a
//! connection exists) or to an RFC 6455 close code (failures on an open
//! connection).

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur during WebSocket operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// The upgrade request was malformed or missing required headers.
    #[error("bad handshake: {reason}")]
    BadHandshake {
        /// Reason why the request is not a valid WebSocket upgrade.
        reason: String,
        /// Whether the failure was an unsupported `Sec-WebSocket-Version`.
        version_mismatch: bool,
    },

    /// No handler is registered for the requested path.
    #[error("no WebSocket route for path {path}")]
    RouteNotFound {
        /// The request path.
        path: String,
    },

    /// The request origin is not on the allow-list.
    #[error("origin not allowed: {}", origin.as_deref().unwrap_or("<none>"))]
    OriginForbidden {
        /// The `Origin` header, if one was sent.
        origin: Option<String>,
    },

    /// The client verification predicate rejected the request.
    #[error("client verification failed: {0}")]
    Unauthorized(String),

    /// The server is already holding its maximum number of connections.
    #[error("connection limit reached ({max})")]
    CapacityExceeded {
        /// The configured maximum.
        max: usize,
    },

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A frame or reassembled message exceeded the configured maximum size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Declared or accumulated size in bytes.
        size: u64,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// A text message was not valid UTF-8.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A handler or middleware failed.
    #[error("internal error: {0}")]
    Internal(String),

    /// The underlying stream failed or was reset without a close frame.
    #[error("abnormal disconnect: {0}")]
    AbnormalDisconnect(String),

    /// The connection is no longer open.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close code, if one was exchanged.
        code: Option<u16>,
        /// Reason for closing.
        reason: String,
    },

    /// The outgoing frame queue is full.
    #[error("send queue full ({capacity} frames pending)")]
    SendQueueFull {
        /// Queue capacity in frames.
        capacity: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Create a new bad handshake error.
    pub fn bad_handshake(reason: impl Into<String>) -> Self {
        Self::BadHandshake {
            reason: reason.into(),
            version_mismatch: false,
        }
    }

    /// Create a bad handshake error caused by an unsupported protocol version.
    pub fn unsupported_version(reason: impl Into<String>) -> Self {
        Self::BadHandshake {
            reason: reason.into(),
            version_mismatch: true,
        }
    }

    /// Create a new route not found error.
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create a new origin forbidden error.
    pub fn origin_forbidden(origin: Option<&str>) -> Self {
        Self::OriginForbidden {
            origin: origin.map(String::from),
        }
    }

    /// Create a new unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    /// Create a new capacity exceeded error.
    pub fn capacity_exceeded(max: usize) -> Self {
        Self::CapacityExceeded { max }
    }

    /// Create a new protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    /// Create a new message too large error.
    pub fn message_too_large(size: u64, max: usize) -> Self {
        Self::MessageTooLarge { size, max }
    }

    /// Create a new invalid payload error.
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload(reason.into())
    }

    /// Create a new internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Create a new abnormal disconnect error.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::AbnormalDisconnect(reason.into())
    }

    /// Create a new connection closed error.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// The HTTP status an admission failure is rejected with.
    ///
    /// Returns `None` for errors that only occur on established connections.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::BadHandshake { .. } => Some(StatusCode::BAD_REQUEST),
            Self::RouteNotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::OriginForbidden { .. } => Some(StatusCode::FORBIDDEN),
            Self::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            Self::CapacityExceeded { .. } => Some(StatusCode::SERVICE_UNAVAILABLE),
            _ => None,
        }
    }

    /// The close code a connection is closed with when this error occurs on it.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::ProtocolError(_) => CloseCode::Protocol,
            Self::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            Self::InvalidPayload(_) => CloseCode::InvalidPayload,
            Self::AbnormalDisconnect(_) | Self::Io(_) => CloseCode::Abnormal,
            Self::ConnectionClosed { code, .. } => code
                .and_then(CloseCode::from_u16)
                .unwrap_or(CloseCode::Normal),
            _ => CloseCode::InternalError,
        }
    }

    /// Check if this is a handshake that failed on `Sec-WebSocket-Version`.
    ///
    /// The rejection then advertises the supported version.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            Self::BadHandshake {
                version_mismatch: true,
                ..
            }
        )
    }

    /// Check if this error is an admission rejection (no connection exists).
    pub fn is_rejection(&self) -> bool {
        self.status_code().is_some()
    }

    /// Check if this error indicates the connection should be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SendQueueFull { .. })
    }
}

/// Close code for WebSocket connections (RFC 6455 §7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    Protocol = 1002,
    /// Unsupported data (1003).
    Unsupported = 1003,
    /// No status received (1005).
    NoStatus = 1005,
    /// Abnormal closure (1006).
    Abnormal = 1006,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Extension required (1010).
    ExtensionRequired = 1010,
    /// Internal error (1011).
    InternalError = 1011,
    /// Service restart (1012).
    ServiceRestart = 1012,
    /// Try again later (1013).
    TryAgainLater = 1013,
    /// Bad gateway (1014).
    BadGateway = 1014,
    /// TLS handshake failure (1015).
    TlsHandshake = 1015,
}

impl CloseCode {
    /// Convert from a u16 code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::Protocol),
            1003 => Some(Self::Unsupported),
            1005 => Some(Self::NoStatus),
            1006 => Some(Self::Abnormal),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1010 => Some(Self::ExtensionRequired),
            1011 => Some(Self::InternalError),
            1012 => Some(Self::ServiceRestart),
            1013 => Some(Self::TryAgainLater),
            1014 => Some(Self::BadGateway),
            1015 => Some(Self::TlsHandshake),
            _ => None,
        }
    }

    /// Get the u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether `code` may appear on the wire in a close frame.
    ///
    /// 1005, 1006 and 1015 are reserved for local reporting, 1004 is
    /// reserved, and everything below 1000 or in 1016..=2999 is unassigned.
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Protocol => "Protocol",
            Self::Unsupported => "Unsupported",
            Self::NoStatus => "NoStatus",
            Self::Abnormal => "Abnormal",
            Self::InvalidPayload => "InvalidPayload",
            Self::PolicyViolation => "PolicyViolation",
            Self::MessageTooBig => "MessageTooBig",
            Self::ExtensionRequired => "ExtensionRequired",
            Self::InternalError => "InternalError",
            Self::ServiceRestart => "ServiceRestart",
            Self::TryAgainLater => "TryAgainLater",
            Self::BadGateway => "BadGateway",
            Self::TlsHandshake => "TlsHandshake",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_errors_map_to_status() {
        assert_eq!(
            WsError::bad_handshake("missing key").status_code(),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            WsError::route_not_found("/nope").status_code(),
            Some(StatusCode::NOT_FOUND)
        );
        assert_eq!(
            WsError::origin_forbidden(Some("https://evil.test")).status_code(),
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            WsError::unauthorized("denied").status_code(),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            WsError::capacity_exceeded(10).status_code(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn test_connection_errors_map_to_close_codes() {
        assert_eq!(WsError::protocol("bad opcode").close_code(), CloseCode::Protocol);
        assert_eq!(
            WsError::message_too_large(2048, 1024).close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            WsError::invalid_payload("utf-8").close_code(),
            CloseCode::InvalidPayload
        );
        assert_eq!(WsError::internal("boom").close_code(), CloseCode::InternalError);
        assert_eq!(WsError::abnormal("reset").close_code(), CloseCode::Abnormal);
        assert!(WsError::protocol("x").status_code().is_none());
    }

    #[test]
    fn test_version_mismatch() {
        assert!(WsError::unsupported_version("version 8").is_version_mismatch());
        assert!(!WsError::bad_handshake("missing key").is_version_mismatch());
        assert!(!WsError::route_not_found("/x").is_version_mismatch());
    }

    #[test]
    fn test_origin_forbidden_display() {
        let err = WsError::origin_forbidden(None);
        assert!(err.to_string().contains("<none>"));

        let err = WsError::origin_forbidden(Some("https://evil.test"));
        assert!(err.to_string().contains("https://evil.test"));
    }

    #[test]
    fn test_send_queue_full_not_fatal() {
        let err = WsError::SendQueueFull { capacity: 8 };
        assert!(!err.is_fatal());
        assert!(WsError::protocol("x").is_fatal());
    }

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), Some(CloseCode::Normal));
        assert_eq!(CloseCode::from_u16(1001), Some(CloseCode::GoingAway));
        assert_eq!(CloseCode::from_u16(9999), None);
    }

    #[test]
    fn test_close_code_sendable() {
        assert!(CloseCode::is_sendable(1000));
        assert!(CloseCode::is_sendable(1011));
        assert!(CloseCode::is_sendable(4000));
        assert!(!CloseCode::is_sendable(1005));
        assert!(!CloseCode::is_sendable(1006));
        assert!(!CloseCode::is_sendable(999));
        assert!(!CloseCode::is_sendable(2500));
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "Normal (1000)");
        assert_eq!(CloseCode::Protocol.to_string(), "Protocol (1002)");
    }
}
