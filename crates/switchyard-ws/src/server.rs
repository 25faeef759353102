//! The engine entry point.
//!
//! A [`WsServer`] owns everything one WebSocket endpoint needs: the route
//! table, middleware, verifier, connection tracker, room registry, heartbeat
//! supervisor and counters. Front-ends hand it "upgrade requested" events
//! either as a raw stream ([`WsServer::handle_upgrade`]) or in two steps
//! ([`WsServer::admit`] then [`WsServer::establish`]) when they write the HTTP
//! response themselves.
//!
//! Admission runs these checks in order, rejecting with the listed status:
//!
//! | step | check | status |
//! |------|-------|--------|
//! | 1 | a route matches the path | 404 |
//! | 2 | the upgrade headers are valid | 400 |
//! | 3 | the origin is allowed | 403 |
//! | 4 | the verifier accepts the request | 401 |
//! | 5 | a connection slot is free | 503 |

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::FutureExt;
use http::StatusCode;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::config::WsConfig;
use crate::connection::{Connection, ConnectionId, ConnectionSettings};
use crate::driver::{self, Application, FrameLimits};
use crate::error::{CloseCode, WsError, WsResult};
use crate::handshake::{self, Handshake};
use crate::heartbeat::HeartbeatSupervisor;
use crate::manager::{CapacityPermit, ConnectionManager};
use crate::message::Message;
use crate::middleware::UpgradeMiddleware;
use crate::request::UpgradeRequest;
use crate::rooms::RoomRegistry;
use crate::route::{RouteMatch, RouteTable, WsHandler};
use crate::stats::{StatsSnapshot, StatsTracker};
use crate::verify::ClientVerifier;

/// Close reason sent to every connection on shutdown.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// One or more route patterns.
pub trait IntoPaths {
    /// Convert into a list of patterns.
    fn into_paths(self) -> Vec<String>;
}

impl IntoPaths for &str {
    fn into_paths(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoPaths for String {
    fn into_paths(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoPaths for &[&str] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_string()).collect()
    }
}

impl<const N: usize> IntoPaths for [&str; N] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_string()).collect()
    }
}

impl IntoPaths for Vec<String> {
    fn into_paths(self) -> Vec<String> {
        self
    }
}

/// An upgrade request that passed every admission check.
///
/// Holds a reserved connection slot; dropping it without calling
/// [`WsServer::establish`] releases the slot.
#[derive(Debug)]
pub struct Admission {
    request: UpgradeRequest,
    route: RouteMatch,
    handshake: Handshake,
    permit: CapacityPermit,
}

impl Admission {
    /// The admitted request.
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// The route pattern that matched.
    pub fn pattern(&self) -> &str {
        &self.route.pattern
    }

    /// The negotiated handshake.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }
}

struct Shared {
    config: WsConfig,
    routes: RwLock<RouteTable>,
    middleware: RwLock<Vec<Arc<dyn UpgradeMiddleware>>>,
    verifier: RwLock<Option<Arc<dyn ClientVerifier>>>,
    connections: Arc<ConnectionManager>,
    rooms: Arc<RoomRegistry>,
    heartbeat: Arc<HeartbeatSupervisor>,
    stats: Arc<StatsTracker>,
}

/// A WebSocket endpoint.
///
/// Cloning is cheap; all clones share the same state.
///
/// # Example
///
/// ```ignore
/// use switchyard_ws::{WsServer, WsConfig, Connection, UpgradeRequest};
///
/// let server = WsServer::new(WsConfig::default());
/// server.route("/chat/*", |conn: Connection, req: UpgradeRequest| async move {
///     let room = req.path().trim_start_matches("/chat/").to_string();
///     conn.join(&room);
///     conn.on_message(move |conn, msg| {
///         conn.broadcast_to_room(&room, msg.clone());
///     });
///     Ok(())
/// });
/// server.start_heartbeat();
/// ```
#[derive(Clone)]
pub struct WsServer {
    shared: Arc<Shared>,
}

impl WsServer {
    /// Create an engine with `config`.
    pub fn new(config: WsConfig) -> Self {
        let connections = ConnectionManager::new(config.max_connections);
        let heartbeat = HeartbeatSupervisor::new(config.heartbeat_interval, config.pong_timeout);
        Self {
            shared: Arc::new(Shared {
                config,
                routes: RwLock::new(RouteTable::new()),
                middleware: RwLock::new(Vec::new()),
                verifier: RwLock::new(None),
                connections,
                rooms: Arc::new(RoomRegistry::new()),
                heartbeat,
                stats: Arc::new(StatsTracker::new()),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &WsConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `handler` for one or more path patterns.
    pub fn route<P, H>(&self, paths: P, handler: H) -> &Self
    where
        P: IntoPaths,
        H: WsHandler,
    {
        let handler: Arc<dyn WsHandler> = Arc::new(handler);
        let mut routes = self.shared.routes.write();
        for path in paths.into_paths() {
            debug!(path = %path, "Registered WebSocket route");
            routes.insert(&path, Arc::clone(&handler));
        }
        self
    }

    /// Register `handler` on every configured path, or on `/*` when none is
    /// configured.
    pub fn on_connection<H>(&self, handler: H) -> &Self
    where
        H: WsHandler,
    {
        let paths = if self.shared.config.paths.is_empty() {
            vec!["/*".to_string()]
        } else {
            self.shared.config.paths.clone()
        };
        self.route(paths, handler)
    }

    /// Append an upgrade middleware. Stages run in registration order.
    pub fn use_middleware<M>(&self, middleware: M) -> &Self
    where
        M: UpgradeMiddleware,
    {
        self.shared.middleware.write().push(Arc::new(middleware));
        self
    }

    /// Install the client verification predicate.
    pub fn verify_client<V>(&self, verifier: V) -> &Self
    where
        V: ClientVerifier,
    {
        *self.shared.verifier.write() = Some(Arc::new(verifier));
        self
    }

    // ------------------------------------------------------------------
    // Upgrades
    // ------------------------------------------------------------------

    /// Run the admission checks for `request`.
    ///
    /// On failure the returned error carries the HTTP status to reject with
    /// (see [`WsError::status_code`]); no connection exists.
    #[instrument(skip_all, fields(path = %request.path()))]
    pub async fn admit(&self, request: &UpgradeRequest) -> WsResult<Admission> {
        let result = self.check(request).await;
        if let Err(e) = &result {
            let status = e.status_code().unwrap_or(StatusCode::BAD_REQUEST);
            self.shared.stats.record_rejection(status.as_u16());
            debug!(status = status.as_u16(), error = %e, "Upgrade rejected");
        }
        result
    }

    async fn check(&self, request: &UpgradeRequest) -> WsResult<Admission> {
        let route = self
            .shared
            .routes
            .read()
            .lookup(request.path())
            .ok_or_else(|| WsError::route_not_found(request.path()))?;

        let handshake = Handshake::negotiate(request.headers(), &self.shared.config.protocols)?;

        let origin = request.origin();
        if !self.shared.config.allow_origins.allows(origin) {
            return Err(WsError::origin_forbidden(origin));
        }

        let verifier = self.shared.verifier.read().clone();
        if let Some(verifier) = verifier {
            let verified = AssertUnwindSafe(verifier.verify(request.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!("Client verifier panicked");
                    false
                });
            if !verified {
                return Err(WsError::unauthorized("client verification failed"));
            }
        }

        let permit = self.shared.connections.reserve()?;

        Ok(Admission {
            request: request.clone(),
            route,
            handshake,
            permit,
        })
    }

    /// Turn an admitted request into a live connection over `stream`.
    ///
    /// The `101` response must already have been written. `buffered` holds
    /// any bytes read past the end of the request head.
    pub fn establish<S>(&self, admission: Admission, stream: S, buffered: BytesMut) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Admission {
            request,
            route,
            handshake,
            permit,
        } = admission;
        let config = &self.shared.config;

        let settings = ConnectionSettings {
            close_timeout: config.close_timeout,
            send_queue_capacity: config.send_queue_capacity,
        };
        let (conn, outbound) = Connection::new(
            request.clone(),
            handshake.protocol,
            &settings,
            Arc::clone(&self.shared.rooms),
            Arc::clone(&self.shared.stats),
        );

        self.shared.connections.track(permit, &conn);
        self.shared.heartbeat.track(&conn);

        let rooms = Arc::clone(&self.shared.rooms);
        conn.on_teardown(move |conn| rooms.leave_all(conn));
        let connections = Arc::clone(&self.shared.connections);
        conn.on_teardown(move |conn| {
            connections.remove(&conn.id());
        });
        let heartbeat = Arc::clone(&self.shared.heartbeat);
        conn.on_teardown(move |conn| heartbeat.untrack(&conn.id()));

        conn.mark_open();
        self.shared.stats.record_accepted();
        info!(
            connection_id = %conn.id(),
            path = %request.path(),
            route = %route.pattern,
            protocol = %conn.protocol(),
            "WebSocket connection established"
        );

        let app = Application {
            middleware: self.shared.middleware.read().clone().into(),
            handler: route.handler,
            request,
        };
        let limits = FrameLimits {
            max_message_size: config.max_message_size,
            accept_unmasked_frames: config.accept_unmasked_frames,
        };
        driver::spawn(stream, buffered, conn.clone(), outbound, limits, app);
        conn
    }

    /// Handle an upgrade over a raw stream: admit, write the response, and
    /// establish the connection.
    ///
    /// Rejected streams get a minimal HTTP response and are dropped after the
    /// rejection grace delay.
    #[instrument(skip_all, fields(path = %request.path()))]
    pub async fn handle_upgrade<S>(
        &self,
        request: UpgradeRequest,
        mut stream: S,
        buffered: BytesMut,
    ) -> WsResult<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let admission = match self.admit(&request).await {
            Ok(admission) => admission,
            Err(e) => {
                let status = e.status_code().unwrap_or(StatusCode::BAD_REQUEST);
                handshake::reject(&mut stream, status, "", e.is_version_mismatch()).await;
                let grace = self.shared.config.reject_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    drop(stream);
                });
                return Err(e);
            }
        };

        // A failed write drops the admission and with it the reserved slot.
        stream
            .write_all(&admission.handshake.response_bytes())
            .await?;
        stream.flush().await?;

        Ok(self.establish(admission, stream, buffered))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The room registry.
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.shared.rooms
    }

    /// The connection tracker.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.shared.connections
    }

    /// Look up an open connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.shared.connections.get(id)
    }

    /// The heartbeat supervisor.
    pub fn heartbeat(&self) -> &Arc<HeartbeatSupervisor> {
        &self.shared.heartbeat
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    /// Send `message` to every open connection. Returns how many it was
    /// queued for.
    pub fn broadcast(&self, message: impl Into<Message>) -> usize {
        let message = message.into();
        self.shared
            .connections
            .connections()
            .iter()
            .filter(|conn| matches!(conn.send(message.clone()), Ok(status) if status.is_queued()))
            .count()
    }

    /// Send `message` to every member of `room` except `exclude`.
    pub fn broadcast_to(
        &self,
        room: &str,
        message: impl Into<Message>,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.shared.rooms.broadcast(room, &message.into(), exclude)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the periodic heartbeat.
    pub fn start_heartbeat(&self) {
        self.shared.heartbeat.start();
    }

    /// Stop the heartbeat, refuse new connections, and close every open
    /// connection with 1001. Returns how many connections were closed.
    pub async fn shutdown(&self) -> usize {
        self.shared.heartbeat.stop().await;
        let closed = self
            .shared
            .connections
            .close_all(CloseCode::GoingAway.as_u16(), SHUTDOWN_REASON);
        info!(connections = closed, "WebSocket engine shut down");
        closed
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("routes", &*self.shared.routes.read())
            .field("connections", &self.shared.connections.len())
            .field("rooms", &self.shared.rooms.room_count())
            .finish_non_exhaustive()
    }
}
