//! Opening handshake negotiation (RFC 6455 §4).
//!
//! Validates upgrade headers, derives the `Sec-WebSocket-Accept` value,
//! selects a sub-protocol, and produces either the `101 Switching Protocols`
//! response or a minimal rejection.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// `Sec-WebSocket-Key` header name.
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
/// `Sec-WebSocket-Version` header name.
pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
/// `Sec-WebSocket-Accept` header name.
pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
/// `Sec-WebSocket-Protocol` header name.
pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Check if the headers have `Connection` containing `upgrade`.
fn has_connection_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Check if the headers have `Upgrade: websocket`.
fn has_websocket_upgrade(headers: &HeaderMap) -> bool {
    header_str(headers, header::UPGRADE)
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Get a non-empty `Sec-WebSocket-Key`.
fn websocket_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, SEC_WEBSOCKET_KEY)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Check if the headers carry `Sec-WebSocket-Version: 13`.
fn has_websocket_version(headers: &HeaderMap) -> bool {
    header_str(headers, SEC_WEBSOCKET_VERSION)
        .map(|v| v.trim() == WEBSOCKET_VERSION)
        .unwrap_or(false)
}

/// Check whether `headers` describe a valid WebSocket upgrade.
pub fn validate_upgrade(headers: &HeaderMap) -> bool {
    validate_upgrade_request(headers).is_ok()
}

/// Validate upgrade headers, returning the computed accept key.
pub fn validate_upgrade_request(headers: &HeaderMap) -> WsResult<String> {
    if !has_websocket_upgrade(headers) {
        return Err(WsError::bad_handshake("missing Upgrade: websocket header"));
    }

    if !has_connection_upgrade(headers) {
        return Err(WsError::bad_handshake("missing Connection: Upgrade header"));
    }

    let key = websocket_key(headers)
        .ok_or_else(|| WsError::bad_handshake("missing Sec-WebSocket-Key header"))?;

    if !has_websocket_version(headers) {
        return Err(WsError::unsupported_version(
            "missing or invalid Sec-WebSocket-Version header (must be 13)",
        ));
    }

    Ok(compute_accept_key(key))
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Get the sub-protocols the client offered, in order.
pub fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(',').map(str::trim))
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// Pick the first client-offered protocol the server supports.
pub fn select_protocol(headers: &HeaderMap, supported: &[String]) -> Option<String> {
    requested_protocols(headers)
        .into_iter()
        .find(|offered| supported.iter().any(|s| s == offered))
}

/// A successfully negotiated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The `Sec-WebSocket-Accept` value.
    pub accept_key: String,
    /// The selected sub-protocol, if any.
    pub protocol: Option<String>,
}

impl Handshake {
    /// Validate `headers` and negotiate against the supported protocol list.
    pub fn negotiate(headers: &HeaderMap, supported: &[String]) -> WsResult<Self> {
        let accept_key = validate_upgrade_request(headers)?;
        let protocol = select_protocol(headers, supported);
        Ok(Self {
            accept_key,
            protocol,
        })
    }

    /// The raw `101 Switching Protocols` response for writing to a stream.
    pub fn response_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(160);
        buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.put_slice(b"Upgrade: websocket\r\n");
        buf.put_slice(b"Connection: Upgrade\r\n");
        buf.put_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept_key).as_bytes());
        if let Some(protocol) = &self.protocol {
            buf.put_slice(format!("Sec-WebSocket-Protocol: {protocol}\r\n").as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// The `101 Switching Protocols` response for front-ends that write it themselves.
    pub fn switching_protocols_response(&self) -> WsResult<Response<Full<Bytes>>> {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(SEC_WEBSOCKET_ACCEPT, header_value(&self.accept_key)?);
        if let Some(protocol) = &self.protocol {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, header_value(protocol)?);
        }
        Ok(response)
    }
}

fn header_value(value: &str) -> WsResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| WsError::internal(format!("invalid header value {value:?}: {e}")))
}

/// Validate `headers` and build the raw 101 response.
pub fn accept(headers: &HeaderMap, supported: &[String]) -> WsResult<(Bytes, Option<String>)> {
    let handshake = Handshake::negotiate(headers, supported)?;
    Ok((handshake.response_bytes(), handshake.protocol))
}

fn sanitize_reason(status: StatusCode, reason: &str) -> String {
    let cleaned: String = reason.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() {
        status.canonical_reason().unwrap_or("Error").to_string()
    } else {
        cleaned
    }
}

/// The raw rejection response: status line, `Connection: close`, empty body.
pub fn rejection_bytes(status: StatusCode, reason: &str, version_mismatch: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            sanitize_reason(status, reason)
        )
        .as_bytes(),
    );
    buf.put_slice(b"Connection: close\r\n");
    buf.put_slice(b"Content-Length: 0\r\n");
    if version_mismatch {
        buf.put_slice(b"Sec-WebSocket-Version: 13\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// The rejection response for front-ends that write it themselves.
pub fn rejection_response(status: StatusCode, version_mismatch: bool) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    if version_mismatch {
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));
    }
    response
}

/// Write a rejection response and shut the stream down.
///
/// Best-effort: a peer that already went away is not an error.
pub async fn reject<S>(stream: &mut S, status: StatusCode, reason: &str, version_mismatch: bool)
where
    S: AsyncWrite + Unpin,
{
    let response = rejection_bytes(status, reason, version_mismatch);
    if let Err(e) = stream.write_all(&response).await {
        debug!(status = status.as_u16(), error = %e, "Failed to write rejection response");
        return;
    }
    if let Err(e) = stream.flush().await {
        debug!(status = status.as_u16(), error = %e, "Failed to flush rejection response");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        headers
    }

    #[test]
    fn test_compute_accept_key() {
        // RFC 6455 example
        let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_validate_upgrade_valid() {
        let headers = ws_headers();
        assert!(validate_upgrade(&headers));
        assert_eq!(
            validate_upgrade_request(&headers).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_validate_upgrade_missing_headers() {
        for name in ["upgrade", "connection", SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION] {
            let mut headers = ws_headers();
            headers.remove(name);
            let err = validate_upgrade_request(&headers).unwrap_err();
            assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST), "{name}");
        }
    }

    #[test]
    fn test_wrong_version_flags_mismatch() {
        let mut headers = ws_headers();
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        let err = validate_upgrade_request(&headers).unwrap_err();
        assert!(matches!(
            err,
            WsError::BadHandshake {
                version_mismatch: true,
                ..
            }
        ));
    }

    #[test]
    fn test_connection_header_token_match() {
        let mut headers = ws_headers();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert!(!validate_upgrade(&headers));
    }

    #[test]
    fn test_response_bytes() {
        let handshake = Handshake::negotiate(&ws_headers(), &[]).unwrap();
        let response = String::from_utf8(handshake.response_bytes().to_vec()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!response.contains("Sec-WebSocket-Protocol"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_protocol_selection_first_client_match() {
        let mut headers = ws_headers();
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("v3, v2"));
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("v1"));
        assert_eq!(requested_protocols(&headers), vec!["v3", "v2", "v1"]);

        let supported = vec!["v1".to_string(), "v2".to_string()];
        let (bytes, protocol) = accept(&headers, &supported).unwrap();
        assert_eq!(protocol.as_deref(), Some("v2"));
        let response = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(response.contains("Sec-WebSocket-Protocol: v2\r\n"));
    }

    #[test]
    fn test_protocol_not_supported_is_omitted() {
        let mut headers = ws_headers();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));
        let handshake = Handshake::negotiate(&headers, &["chat".to_string()]).unwrap();
        assert_eq!(handshake.protocol, None);
    }

    #[test]
    fn test_switching_protocols_response() {
        let handshake = Handshake {
            accept_key: "abc=".to_string(),
            protocol: Some("chat".to_string()),
        };
        let response = handshake.switching_protocols_response().unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[SEC_WEBSOCKET_ACCEPT], "abc=");
        assert_eq!(response.headers()[SEC_WEBSOCKET_PROTOCOL], "chat");
    }

    #[test]
    fn test_rejection_bytes() {
        let bytes = rejection_bytes(StatusCode::NOT_FOUND, "", false);
        assert_eq!(
            &bytes[..],
            b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );

        let bytes = rejection_bytes(StatusCode::BAD_REQUEST, "bad\r\nversion", true);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 badversion\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[tokio::test]
    async fn test_reject_writes_and_shuts_down() {
        use tokio::io::AsyncReadExt;

        let (mut server, mut client) = tokio::io::duplex(1024);
        reject(&mut server, StatusCode::FORBIDDEN, "Forbidden", false).await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.starts_with(b"HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn test_reject_when_peer_gone() {
        let (mut server, client) = tokio::io::duplex(16);
        drop(client);
        // must not panic or error
        reject(&mut server, StatusCode::SERVICE_UNAVAILABLE, "", false).await;
    }
}
