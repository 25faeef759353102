//! Handshake response parsing.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use switchyard_ws::handshake::{compute_accept_key, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_PROTOCOL};

use crate::error::{TestClientError, TestResult};

/// The server's answer to an upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
}

impl HandshakeResponse {
    /// Parse a response head (everything before the blank line).
    pub fn parse(head: &[u8]) -> TestResult<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|e| TestClientError::MalformedResponse(e.to_string()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .ok_or_else(|| TestClientError::MalformedResponse("empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(TestClientError::MalformedResponse(format!(
                "bad status line: {status_line}"
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| {
                TestClientError::MalformedResponse(format!("bad status line: {status_line}"))
            })?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = HeaderMap::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TestClientError::MalformedResponse(format!("bad header line: {line}"))
            })?;
            let name = HeaderName::try_from(name.trim())
                .map_err(|e| TestClientError::MalformedResponse(e.to_string()))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| TestClientError::MalformedResponse(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the status code as a u16.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The reason phrase from the status line.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns true for `101 Switching Protocols`.
    #[must_use]
    pub fn is_switching_protocols(&self) -> bool {
        self.status == StatusCode::SWITCHING_PROTOCOLS
    }

    /// Returns a reference to the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Gets a header value as a string.
    #[must_use]
    pub fn header_str(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// The `Sec-WebSocket-Accept` value.
    #[must_use]
    pub fn accept_key(&self) -> Option<&str> {
        self.header_str(SEC_WEBSOCKET_ACCEPT)
    }

    /// The negotiated sub-protocol.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.header_str(SEC_WEBSOCKET_PROTOCOL)
    }

    /// Check the accept value against the key the client sent.
    #[must_use]
    pub fn accepts_key(&self, client_key: &str) -> bool {
        self.accept_key() == Some(compute_accept_key(client_key).as_str())
    }

    /// Asserts that the status code matches.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match.
    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status_code(),
            expected,
            "Expected status {}, got {} {}",
            expected,
            self.status_code(),
            self.reason
        );
        self
    }

    /// Asserts that a header has the expected value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or has a different value.
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let actual = self.header_str(name);
        assert_eq!(
            actual,
            Some(expected),
            "Expected header {name}: {expected}, got {actual:?}"
        );
        self
    }
}

/// Find the end of an HTTP head in `buf`, returning the index just past the
/// blank line.
pub(crate) fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switching_protocols() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let response = HandshakeResponse::parse(head).unwrap();
        assert!(response.is_switching_protocols());
        assert!(response.accepts_key("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(response.protocol(), None);
        response.assert_header("upgrade", "websocket");
    }

    #[test]
    fn test_parse_rejection() {
        let head = b"HTTP/1.1 403 Forbidden\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
        let response = HandshakeResponse::parse(head).unwrap();
        response.assert_status(403);
        assert_eq!(response.reason(), "Forbidden");
        assert_eq!(response.header_str("connection"), Some("close"));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(HandshakeResponse::parse(b"SSH-2.0-OpenSSH\r\n\r\n").is_err());
        assert!(HandshakeResponse::parse(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }

    #[test]
    fn test_head_end() {
        assert_eq!(head_end(b"HTTP/1.1 101 X\r\n\r\n\x81\x00"), Some(18));
        assert_eq!(head_end(b"HTTP/1.1 101 X\r\n"), None);
    }
}
