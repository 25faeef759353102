//! # Switchyard Server
//!
//! HTTP front-end for the Switchyard WebSocket engine.
//!
//! This crate puts a hyper listener in front of a
//! [`WsServer`](switchyard_ws::WsServer):
//!
//! - HTTP/1.1 connections with upgrade support
//! - Upgrade admission and handoff to the engine
//! - Health check and Prometheus metrics endpoints
//! - Graceful shutdown on SIGINT/SIGTERM with a drain timeout
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchyard_server::{Server, ServerConfig};
//! use switchyard_ws::{Connection, UpgradeRequest, WsConfig, WsError, WsServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = WsServer::new(WsConfig::default());
//!     ws.route("/chat/*", |conn: Connection, req: UpgradeRequest| async move {
//!         conn.join(req.path());
//!         Ok::<(), WsError>(())
//!     });
//!
//!     let config = ServerConfig::builder().http_addr("0.0.0.0:8080").build();
//!     Server::new(config, ws).run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod health;
mod server;
mod shutdown;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_HEALTH_PATH, DEFAULT_HTTP_ADDR,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use error::{ServerError, ServerResult};
pub use health::{HealthCheck, HealthStatus};
pub use server::{HttpResponse, ResponseBody, Server};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
