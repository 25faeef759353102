//! The "upgrade requested" event.

use std::net::SocketAddr;

use http::{header, HeaderMap, Method, Request, Uri};

/// An HTTP request asking to be upgraded to a WebSocket.
///
/// Detached from any body so it can be handed to verifiers, middleware and
/// handlers and kept on the connection as metadata.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
}

impl UpgradeRequest {
    /// Create a request from its parts.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr: None,
        }
    }

    /// Capture the head of an `http` request.
    pub fn from_http<B>(request: &Request<B>) -> Self {
        Self::new(
            request.method().clone(),
            request.uri().clone(),
            request.headers().clone(),
        )
    }

    /// Attach the client's address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Origin` header.
    pub fn origin(&self) -> Option<&str> {
        self.header(header::ORIGIN)
    }

    /// The client's address, if the front-end supplied one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http() {
        let request = Request::builder()
            .uri("/chat/room1?token=abc")
            .header(header::ORIGIN, "https://app.test")
            .body(())
            .unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let upgrade = UpgradeRequest::from_http(&request).with_remote_addr(addr);

        assert_eq!(upgrade.method(), &Method::GET);
        assert_eq!(upgrade.path(), "/chat/room1");
        assert_eq!(upgrade.query(), Some("token=abc"));
        assert_eq!(upgrade.origin(), Some("https://app.test"));
        assert_eq!(upgrade.remote_addr(), Some(addr));
    }

    #[test]
    fn test_missing_origin() {
        let upgrade = UpgradeRequest::new(Method::GET, Uri::from_static("/"), HeaderMap::new());
        assert_eq!(upgrade.origin(), None);
        assert_eq!(upgrade.remote_addr(), None);
    }
}
