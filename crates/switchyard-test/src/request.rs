//! Upgrade request building.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use switchyard_ws::handshake::{SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION};
use switchyard_ws::UpgradeRequest;
use uuid::Uuid;

use crate::error::{TestClientError, TestResult};

/// Builder for WebSocket upgrade requests.
///
/// Produces either the raw HTTP/1.1 request head for writing to a socket, or
/// an [`UpgradeRequest`] for handing straight to the engine.
///
/// # Example
///
/// ```ignore
/// let request = UpgradeRequestBuilder::new("/chat/room1")
///     .origin("https://app.example")
///     .protocol("chat.v1");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct UpgradeRequestBuilder {
    path: String,
    host: String,
    key: String,
    version: String,
    origin: Option<String>,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
    omit: Vec<HeaderName>,
}

impl UpgradeRequestBuilder {
    /// Create a valid upgrade request for `path` with a fresh key.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: "localhost".to_string(),
            key: generate_key(),
            version: "13".to_string(),
            origin: None,
            protocols: Vec::new(),
            headers: Vec::new(),
            omit: Vec::new(),
        }
    }

    /// Set the `Host` header.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Use a fixed `Sec-WebSocket-Key`.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Override `Sec-WebSocket-Version`.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the `Origin` header.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Offer a sub-protocol. Offers keep their order.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add an extra header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Leave out one of the standard upgrade headers.
    pub fn without(mut self, name: HeaderName) -> Self {
        self.omit.push(name);
        self
    }

    /// The `Sec-WebSocket-Key` the request carries.
    pub fn client_key(&self) -> &str {
        &self.key
    }

    /// The path and query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Build the header map.
    pub fn headers(&self) -> TestResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut put = |name: HeaderName, value: &str| -> TestResult<()> {
            if self.omit.contains(&name) {
                return Ok(());
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| TestClientError::RequestBuild(format!("{name}: {e}")))?;
            headers.append(name, value);
            Ok(())
        };

        put(header::HOST, &self.host)?;
        put(header::UPGRADE, "websocket")?;
        put(header::CONNECTION, "Upgrade")?;
        put(HeaderName::from_static(SEC_WEBSOCKET_KEY), &self.key)?;
        put(HeaderName::from_static(SEC_WEBSOCKET_VERSION), &self.version)?;
        if let Some(origin) = &self.origin {
            put(header::ORIGIN, origin)?;
        }
        if !self.protocols.is_empty() {
            put(
                HeaderName::from_static(SEC_WEBSOCKET_PROTOCOL),
                &self.protocols.join(", "),
            )?;
        }
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| TestClientError::RequestBuild(format!("{name}: {e}")))?;
            put(name, value)?;
        }
        Ok(headers)
    }

    /// Build the engine-side request.
    pub fn build(&self) -> TestResult<UpgradeRequest> {
        let uri: Uri = self
            .path
            .parse()
            .map_err(|e| TestClientError::RequestBuild(format!("{}: {e}", self.path)))?;
        Ok(UpgradeRequest::new(Method::GET, uri, self.headers()?))
    }

    /// Build the raw HTTP/1.1 request head.
    pub fn to_bytes(&self) -> TestResult<Vec<u8>> {
        let mut head = format!("GET {} HTTP/1.1\r\n", self.path);
        for (name, value) in &self.headers()? {
            let value = value
                .to_str()
                .map_err(|e| TestClientError::RequestBuild(e.to_string()))?;
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        Ok(head.into_bytes())
    }
}

/// A random base64-encoded 16-byte nonce.
pub fn generate_key() -> String {
    STANDARD.encode(Uuid::now_v7().as_bytes())
}
