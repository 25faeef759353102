//! HTTP front-end for the WebSocket engine.
//!
//! # Architecture
//!
//! - TCP listener bound to the configured address
//! - One hyper HTTP/1.1 connection task per socket, upgrades enabled
//! - Upgrade requests admitted by the [`WsServer`]; admitted sockets are
//!   handed to the engine once hyper releases them
//! - Health and metrics endpoints; any other plain request gets
//!   `426 Upgrade Required`
//! - Graceful shutdown: stop accepting, close every WebSocket with 1001,
//!   wait for connections to drain
//!
//! # Example
//!
//! ```rust,ignore
//! use switchyard_server::{Server, ServerConfig};
//! use switchyard_ws::{WsConfig, WsServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = WsServer::new(WsConfig::default());
//!     ws.route("/echo", echo_handler);
//!
//!     let config = ServerConfig::builder().http_addr("0.0.0.0:8080").build();
//!     Server::new(config, ws).run().await?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use switchyard_telemetry::MetricsRegistry;
use switchyard_ws::handshake::{self, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION};
use switchyard_ws::{UpgradeRequest, WsServer};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::health::HealthCheck;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Type alias for HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// The Switchyard server: a listener in front of a [`WsServer`].
pub struct Server {
    config: ServerConfig,
    ws: WsServer,
    health: HealthCheck,
    metrics: Option<MetricsRegistry>,
}

impl Server {
    /// Creates a server that admits upgrades through `ws`.
    #[must_use]
    pub fn new(config: ServerConfig, ws: WsServer) -> Self {
        Self {
            config,
            ws,
            health: HealthCheck::new("switchyard", env!("CARGO_PKG_VERSION")),
            metrics: None,
        }
    }

    /// Sets the service name and version the health endpoint reports.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.health = HealthCheck::new(name, version);
        self
    }

    /// Serves `registry` on the configured metrics path.
    #[must_use]
    pub fn with_metrics(mut self, registry: MetricsRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the WebSocket engine.
    #[must_use]
    pub fn ws(&self) -> &WsServer {
        &self.ws
    }

    /// Returns the health check state.
    #[must_use]
    pub fn health(&self) -> &HealthCheck {
        &self.health
    }

    /// Runs until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> ServerResult<()> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                reason: e.to_string(),
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve(listener, shutdown).await
    }

    /// Accepts on `listener` until `shutdown` fires, then drains.
    ///
    /// Starts the heartbeat supervisor; shutdown stops it.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Switchyard listening");

        self.ws.start_heartbeat();

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                biased;

                () = shutdown.recv() => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = Arc::clone(&server);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                server.handle_connection(stream, remote_addr, shutdown).await;
                                drop(token);
                            });
                        }
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }

        drop(listener);
        server.drain(&tracker).await;
        Ok(())
    }

    /// Closes every WebSocket with 1001 and waits up to the shutdown timeout.
    async fn drain(&self, tracker: &ConnectionTracker) {
        self.health.set_draining();

        let open = self.ws.connections().connections();
        self.ws.shutdown().await;

        let timeout = self.config.shutdown_timeout();
        info!(
            websockets = open.len(),
            http = tracker.active_connections(),
            timeout_ms = timeout.as_millis() as u64,
            "Draining connections"
        );

        let drained = tokio::time::timeout(timeout, async {
            for conn in &open {
                conn.closed().await;
            }
            tracker.wait_for_idle().await;
        })
        .await;

        match drained {
            Ok(()) => info!("All connections closed"),
            Err(_) => {
                let remaining = self.ws.connections().connections();
                warn!(
                    websockets = remaining.len(),
                    http = tracker.active_connections(),
                    "Shutdown timeout reached, aborting remaining connections"
                );
                for conn in remaining {
                    conn.abort("shutdown timeout");
                }
            }
        }

        info!("Server stopped");
    }

    /// Serves one TCP connection until it closes, upgrades or shutdown.
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let server = Arc::clone(&self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req, remote_addr).await) }
        });

        let conn = http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades();
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(e) = result {
            debug!(peer = %remote_addr, error = %e, "HTTP connection error");
        }
    }

    /// Routes one HTTP request.
    async fn handle_request(&self, req: Request<Incoming>, remote_addr: SocketAddr) -> HttpResponse {
        if is_upgrade_attempt(req.headers()) {
            return self.handle_upgrade(req, remote_addr).await;
        }

        let path = req.uri().path();
        if req.method() == Method::GET {
            if path == self.config.health_path() {
                return self.handle_health();
            }
            if let (Some(metrics_path), Some(registry)) = (self.config.metrics_path(), &self.metrics) {
                if path == metrics_path {
                    return handle_metrics(registry);
                }
            }
        }

        debug!(method = %req.method(), path, "Plain HTTP request refused");
        upgrade_required()
    }

    /// Admits an upgrade and hands the socket to the engine once hyper
    /// releases it.
    #[instrument(skip(self, req, remote_addr), fields(path = %req.uri().path(), peer = %remote_addr))]
    async fn handle_upgrade(&self, mut req: Request<Incoming>, remote_addr: SocketAddr) -> HttpResponse {
        let request = UpgradeRequest::from_http(&req).with_remote_addr(remote_addr);

        let admission = match self.ws.admit(&request).await {
            Ok(admission) => admission,
            Err(e) => {
                let status = e.status_code().unwrap_or(StatusCode::BAD_REQUEST);
                return handshake::rejection_response(status, e.is_version_mismatch());
            }
        };

        let response = match admission.handshake().switching_protocols_response() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to build handshake response");
                return handshake::rejection_response(StatusCode::INTERNAL_SERVER_ERROR, false);
            }
        };

        let on_upgrade = hyper::upgrade::on(&mut req);
        let ws = self.ws.clone();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    ws.establish(admission, TokioIo::new(upgraded), BytesMut::new());
                }
                // Dropping the admission releases its capacity slot.
                Err(e) => debug!(error = %e, "Upgrade did not complete"),
            }
        });

        response
    }

    fn handle_health(&self) -> HttpResponse {
        let status = self.health.status(self.ws.connections().len());
        let body = serde_json::to_string(&status)
            .unwrap_or_else(|_| r#"{"status":"healthy"}"#.to_string());

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("ws", &self.ws)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// A request that carries WebSocket upgrade headers. Malformed ones still go
/// through admission so the client gets a precise status.
fn is_upgrade_attempt(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE) || headers.contains_key(SEC_WEBSOCKET_KEY)
}

fn handle_metrics(registry: &MetricsRegistry) -> HttpResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(registry.render())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn upgrade_required() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Upgrade Required")));
    *response.status_mut() = StatusCode::UPGRADE_REQUIRED;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
