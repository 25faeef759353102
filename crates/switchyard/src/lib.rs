//! # Switchyard
//!
//! **RFC 6455 WebSocket server with rooms, heartbeats and graceful shutdown**
//!
//! Switchyard bundles:
//!
//! - **Protocol engine** – frame codec, opening handshake, close handshake
//!   and fragmentation per RFC 6455 ([`ws`])
//! - **Connection management** – capacity limits, rooms, broadcast and
//!   ping/pong liveness
//! - **Admission** – path routing, origin policy, client verification and
//!   upgrade middleware
//! - **HTTP front-end** – hyper listener with health and metrics endpoints
//!   ([`server`])
//! - **Configuration and telemetry** – layered TOML/env config, structured
//!   logs and Prometheus metrics ([`config`], [`telemetry`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = WsServer::new(WsConfig::default());
//!     ws.route("/chat/*", |conn: Connection, req: UpgradeRequest| async move {
//!         let room = req.path().trim_start_matches("/chat/").to_string();
//!         conn.join(&room);
//!         conn.on_message(move |conn, msg| {
//!             conn.broadcast_to_room(&room, msg.clone());
//!         });
//!         Ok::<(), WsError>(())
//!     });
//!
//!     let config = ServerConfig::builder().http_addr("0.0.0.0:8080").build();
//!     Server::new(config, ws).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection Lifecycle
//!
//! ```text
//! GET + Upgrade → route → headers → origin → verifier → capacity → 101
//!                                                                   ↓
//! Closed ← Closing ← close handshake / heartbeat timeout ← Open ←──┘
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export the protocol engine
pub use switchyard_ws as ws;

// Re-export the HTTP front-end
pub use switchyard_server as server;

// Re-export configuration
pub use switchyard_config as config;

// Re-export telemetry
pub use switchyard_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use switchyard::prelude::*;
/// ```
pub mod prelude {
    // Engine
    pub use switchyard_ws::{
        ClientVerifier, CloseCode, CloseFrame, Connection, ConnectionId, Message, Next,
        OriginPolicy, ReadyState, SendStatus, UpgradeMiddleware, UpgradeRequest, WsConfig,
        WsError, WsResult, WsServer,
    };

    // Front-end
    pub use switchyard_server::{Server, ServerConfig, ShutdownSignal};

    // Configuration and telemetry
    pub use switchyard_config::{ConfigLoader, SwitchyardConfig};
    pub use switchyard_telemetry::{init_telemetry, ServiceIdentity, TelemetryConfig};
}
