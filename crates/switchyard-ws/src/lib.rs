//! RFC 6455 WebSocket protocol engine for Switchyard.
//!
//! This crate upgrades HTTP connections to WebSocket streams, parses and
//! builds frames directly over the raw byte stream, tracks each connection's
//! lifecycle and liveness, and fans messages out to named rooms.
//!
//! # Features
//!
//! - **Frame codec** written against RFC 6455: masking, three-tier lengths,
//!   control frame rules, fragmentation with per-connection reassembly
//! - **Handshake negotiation** with sub-protocol selection
//! - **Upgrade routing** with exact and trailing-wildcard paths, origin
//!   allow-lists, async client verification and a capacity limit
//! - **Connection state machine** with listeners, a bounded send queue and a
//!   close handshake with a grace timeout
//! - **Heartbeats** that evict unresponsive peers
//! - **Rooms** for group broadcast
//! - **Counters** mirrored to the `metrics` facade
//!
//! # Example
//!
//! ```ignore
//! use switchyard_ws::{Connection, UpgradeRequest, WsConfig, WsServer};
//!
//! let server = WsServer::new(WsConfig::default().allow_origin("https://app.example"));
//!
//! server.route("/chat/*", |conn: Connection, req: UpgradeRequest| async move {
//!     let room = req.path().trim_start_matches("/chat/").to_string();
//!     conn.join(&room);
//!     conn.on_message(move |conn, msg| {
//!         conn.broadcast_to_room(&room, msg.clone());
//!     });
//!     Ok(())
//! });
//! server.start_heartbeat();
//!
//! // For every accepted TCP stream whose request asks for an upgrade:
//! let conn = server.handle_upgrade(request, stream, leftover_bytes).await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Upgrade Flow                            │
//! │                                                              │
//! │  UpgradeRequest ──► WsServer::admit()                        │
//! │       │               route 404 · headers 400 · origin 403   │
//! │       │               verify 401 · capacity 503              │
//! │       ▼                                                      │
//! │  101 Switching Protocols ──► WsServer::establish()           │
//! │       │                                                      │
//! │       ▼                                                      │
//! │  driver task: middleware ──► handler ──► read loop           │
//! │       │                         frame codec ──► listeners    │
//! │       ▼                                                      │
//! │  writer task drains the send queue                           │
//! │       │                                                      │
//! │       ▼                                                      │
//! │  On close: rooms, tracker and heartbeat set are cleared      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection States
//!
//! A [`Connection`] moves through [`ReadyState::Connecting`],
//! [`ReadyState::Open`], [`ReadyState::Closing`] and [`ReadyState::Closed`]
//! and never goes back. Sends are accepted only while open.

pub mod config;
pub mod connection;
mod driver;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod manager;
pub mod message;
pub mod middleware;
pub mod origin;
pub mod request;
pub mod rooms;
pub mod route;
pub mod server;
pub mod stats;
pub mod verify;

// Re-exports for convenience
pub use config::WsConfig;
pub use connection::{Connection, ConnectionId, ReadyState, SendStatus};
pub use error::{CloseCode, WsError, WsResult};
pub use frame::{Frame, Opcode};
pub use handshake::Handshake;
pub use heartbeat::{HeartbeatSupervisor, SweepReport};
pub use manager::{CapacityPermit, ConnectionManager, ConnectionStats};
pub use message::{CloseFrame, Message};
pub use middleware::{Next, UpgradeMiddleware};
pub use origin::{OriginPolicy, OriginRule};
pub use request::UpgradeRequest;
pub use rooms::RoomRegistry;
pub use route::{BoxFuture, RouteMatch, RouteTable, WsHandler};
pub use server::{Admission, IntoPaths, WsServer};
pub use stats::{StatsSnapshot, StatsTracker};
pub use verify::{AllowAll, ClientVerifier};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        let _config = WsConfig::default();
        let _id = ConnectionId::new();
        let _msg = Message::text("hello");
        let _close = CloseCode::Normal;
        let _policy = OriginPolicy::allow_all();
        let _stats = StatsTracker::new().snapshot();
    }
}
