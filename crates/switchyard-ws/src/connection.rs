//! WebSocket connection state and lifecycle.
//!
//! A [`Connection`] is a cheap, cloneable handle to one upgraded stream. The
//! stream itself is owned by two tasks spawned by the driver: a reader that
//! decodes frames and dispatches them here, and a writer that drains the
//! bounded outgoing queue. The handle is what applications keep: it sends,
//! closes, registers listeners, and joins rooms.
//!
//! State only ever moves forward:
//!
//! ```text
//! CONNECTING -> OPEN -> CLOSING -> CLOSED
//!      \__________\_________________^
//! ```
//!
//! Every path into CLOSED runs the same finalizer exactly once, which leaves
//! all rooms, removes the connection from the tracker and the heartbeat
//! supervisor, notifies close listeners, and releases the stream.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{CloseCode, WsError, WsResult};
use crate::frame::{self, Opcode};
use crate::message::{CloseFrame, Message};
use crate::request::UpgradeRequest;
use crate::rooms::RoomRegistry;
use crate::stats::{ErrorKind, StatsTracker};

/// Extra queue slots kept for control frames (pong, close) so they can be
/// queued even when data sends are being refused.
const CONTROL_SLACK: usize = 8;

/// A unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for Uuid {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    /// Handshake written, not yet registered.
    Connecting,
    /// Open for sending and receiving.
    Open,
    /// A close frame has been sent or received.
    Closing,
    /// Torn down. Never left.
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Outcome of a send attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The frame was queued for the writer.
    Queued,
    /// The connection is not open; nothing was sent.
    NotOpen,
}

impl SendStatus {
    /// Whether the frame was queued.
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// A frame waiting for the writer.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    pub(crate) bytes: Bytes,
    pub(crate) data: bool,
}

type MessageListener = Arc<dyn Fn(&Connection, &Message) + Send + Sync>;
type PayloadListener = Arc<dyn Fn(&Connection, &Bytes) + Send + Sync>;
type CloseListener = Arc<dyn Fn(&Connection, &CloseFrame) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&Connection, &WsError) + Send + Sync>;
type TeardownHook = Box<dyn FnOnce(&Connection) + Send>;

#[derive(Default)]
struct Listeners {
    message: Vec<MessageListener>,
    ping: Vec<PayloadListener>,
    pong: Vec<PayloadListener>,
    close: Vec<CloseListener>,
    error: Vec<ErrorListener>,
}

/// Per-connection settings taken from the engine configuration.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub(crate) close_timeout: Duration,
    pub(crate) send_queue_capacity: usize,
}

struct ConnectionInner {
    id: ConnectionId,
    request: UpgradeRequest,
    protocol: String,
    connected_at: Instant,
    state: watch::Sender<ReadyState>,
    alive: AtomicBool,
    last_pong: Mutex<Instant>,
    last_activity: Mutex<Instant>,
    rooms: Mutex<HashSet<String>>,
    listeners: Mutex<Listeners>,
    outbound: mpsc::Sender<OutboundFrame>,
    send_queue_capacity: usize,
    buffered: AtomicUsize,
    close_frame: Mutex<Option<CloseFrame>>,
    teardown: Mutex<Vec<TeardownHook>>,
    finalized: AtomicBool,
    writer: Mutex<Option<AbortHandle>>,
    close_timeout: Duration,
    registry: Arc<RoomRegistry>,
    stats: Arc<StatsTracker>,
}

/// A handle to one WebSocket connection.
///
/// Cloning is cheap; all clones refer to the same connection.
///
/// # Example
///
/// ```ignore
/// server.route("/echo", |conn: Connection, _req| async move {
///     conn.on_message(|conn, msg| {
///         let _ = conn.send(msg.clone());
///     });
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        request: UpgradeRequest,
        protocol: Option<String>,
        settings: &ConnectionSettings,
        registry: Arc<RoomRegistry>,
        stats: Arc<StatsTracker>,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let capacity = settings.send_queue_capacity.max(1);
        let (outbound, rx) = mpsc::channel(capacity + CONTROL_SLACK);
        let (state, _) = watch::channel(ReadyState::Connecting);
        let now = Instant::now();

        let inner = ConnectionInner {
            id: ConnectionId::new(),
            request,
            protocol: protocol.unwrap_or_default(),
            connected_at: now,
            state,
            alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            last_activity: Mutex::new(now),
            rooms: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Listeners::default()),
            outbound,
            send_queue_capacity: capacity,
            buffered: AtomicUsize::new(0),
            close_frame: Mutex::new(None),
            teardown: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
            writer: Mutex::new(None),
            close_timeout: settings.close_timeout,
            registry,
            stats,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// The connection ID.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// The upgrade request this connection was created from.
    pub fn request(&self) -> &UpgradeRequest {
        &self.inner.request
    }

    /// The request path.
    pub fn path(&self) -> &str {
        self.inner.request.path()
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.request.headers()
    }

    /// The client address, if known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.request.remote_addr()
    }

    /// The negotiated sub-protocol, or an empty string.
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    /// When the handshake completed.
    pub fn connected_at(&self) -> Instant {
        self.inner.connected_at
    }

    /// When a frame was last received.
    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    /// When the peer last proved liveness.
    pub fn last_pong(&self) -> Instant {
        *self.inner.last_pong.lock()
    }

    /// Whether the peer answered since the last heartbeat ping.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// The current state.
    pub fn ready_state(&self) -> ReadyState {
        *self.inner.state.borrow()
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Bytes queued for the writer but not yet written.
    pub fn buffered_amount(&self) -> usize {
        self.inner.buffered.load(Ordering::Acquire)
    }

    /// Names of the rooms this connection is in.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.inner.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Whether this connection is in `room`.
    pub fn in_room(&self, room: &str) -> bool {
        self.inner.rooms.lock().contains(room)
    }

    /// How the connection closed, once it has begun closing.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.inner.close_frame.lock().clone()
    }

    /// Wait until the connection is CLOSED.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state == ReadyState::Closed).await;
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Join `room`. Idempotent; a no-op once the connection is closing down.
    pub fn join(&self, room: &str) {
        self.inner.registry.join(self, room);
    }

    /// Leave `room`. Idempotent, in any state.
    pub fn leave(&self, room: &str) {
        self.inner.registry.leave(self, room);
    }

    /// Send to every other member of `room`.
    pub fn broadcast_to_room(&self, room: &str, message: impl Into<Message>) -> usize {
        self.inner
            .registry
            .broadcast(room, &message.into(), Some(self.id()))
    }

    pub(crate) fn room_set(&self) -> &Mutex<HashSet<String>> {
        &self.inner.rooms
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a listener for complete data messages.
    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        if self.ready_state() < ReadyState::Closed {
            self.inner.listeners.lock().message.push(Arc::new(listener));
        }
    }

    /// Register a listener for pings from the peer.
    pub fn on_ping<F>(&self, listener: F)
    where
        F: Fn(&Connection, &Bytes) + Send + Sync + 'static,
    {
        if self.ready_state() < ReadyState::Closed {
            self.inner.listeners.lock().ping.push(Arc::new(listener));
        }
    }

    /// Register a listener for pongs from the peer.
    pub fn on_pong<F>(&self, listener: F)
    where
        F: Fn(&Connection, &Bytes) + Send + Sync + 'static,
    {
        if self.ready_state() < ReadyState::Closed {
            self.inner.listeners.lock().pong.push(Arc::new(listener));
        }
    }

    /// Register a listener called once when the connection closes.
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&Connection, &CloseFrame) + Send + Sync + 'static,
    {
        if self.ready_state() < ReadyState::Closed {
            self.inner.listeners.lock().close.push(Arc::new(listener));
        }
    }

    /// Register a listener for errors on the connection.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&Connection, &WsError) + Send + Sync + 'static,
    {
        if self.ready_state() < ReadyState::Closed {
            self.inner.listeners.lock().error.push(Arc::new(listener));
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Queue a data message.
    ///
    /// Returns [`SendStatus::NotOpen`] without sending when the connection is
    /// not open, and [`WsError::SendQueueFull`] when the outgoing queue is at
    /// capacity.
    pub fn send(&self, message: impl Into<Message>) -> WsResult<SendStatus> {
        if !self.is_open() {
            return Ok(SendStatus::NotOpen);
        }
        let message = message.into();
        let bytes = frame::encode_frame(message.opcode(), message.as_bytes());

        // Keep the slack free for control frames.
        if self.inner.outbound.capacity() <= CONTROL_SLACK {
            return Err(WsError::SendQueueFull {
                capacity: self.inner.send_queue_capacity,
            });
        }
        Ok(self.enqueue(bytes, true))
    }

    /// Queue a data message, waiting for queue space if necessary.
    pub async fn send_wait(&self, message: impl Into<Message>) -> WsResult<SendStatus> {
        if !self.is_open() {
            return Ok(SendStatus::NotOpen);
        }
        let message = message.into();
        let bytes = frame::encode_frame(message.opcode(), message.as_bytes());

        let Ok(permit) = self.inner.outbound.reserve().await else {
            return Ok(SendStatus::NotOpen);
        };
        if !self.is_open() {
            return Ok(SendStatus::NotOpen);
        }
        self.inner.buffered.fetch_add(bytes.len(), Ordering::AcqRel);
        permit.send(OutboundFrame { bytes, data: true });
        Ok(SendStatus::Queued)
    }

    /// Send a ping with `payload` (at most 125 bytes).
    pub fn ping(&self, payload: impl Into<Bytes>) -> WsResult<SendStatus> {
        self.send_control(Opcode::Ping, payload.into())
    }

    /// Send an unsolicited pong with `payload` (at most 125 bytes).
    pub fn pong(&self, payload: impl Into<Bytes>) -> WsResult<SendStatus> {
        self.send_control(Opcode::Pong, payload.into())
    }

    fn send_control(&self, opcode: Opcode, payload: Bytes) -> WsResult<SendStatus> {
        if payload.len() > frame::MAX_CONTROL_PAYLOAD {
            return Err(WsError::protocol(format!(
                "control frame payload of {} bytes exceeds {}",
                payload.len(),
                frame::MAX_CONTROL_PAYLOAD
            )));
        }
        if !self.is_open() {
            return Ok(SendStatus::NotOpen);
        }
        Ok(self.enqueue(frame::encode_frame(opcode, &payload), false))
    }

    fn enqueue(&self, bytes: Bytes, data: bool) -> SendStatus {
        let len = bytes.len();
        self.inner.buffered.fetch_add(len, Ordering::AcqRel);
        match self.inner.outbound.try_send(OutboundFrame { bytes, data }) {
            Ok(()) => SendStatus::Queued,
            Err(e) => {
                self.inner.buffered.fetch_sub(len, Ordering::AcqRel);
                trace!(connection_id = %self.id(), error = %e, "Dropped outgoing frame");
                SendStatus::NotOpen
            }
        }
    }

    pub(crate) fn frame_written(&self, len: usize, data: bool) {
        self.inner.buffered.fetch_sub(len, Ordering::AcqRel);
        self.inner.stats.record_bytes_sent(len);
        if data {
            self.inner.stats.record_message_sent();
        }
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Begin the closing handshake with `code` and `reason`.
    ///
    /// The stream is released when the peer answers or after the close
    /// timeout, whichever comes first. No-op unless the connection is open.
    pub fn close(&self, code: impl Into<u16>, reason: &str) {
        let code = code.into();
        if !self.advance(ReadyState::Closing) {
            return;
        }
        debug!(connection_id = %self.id(), code, reason, "Closing connection");
        self.record_close(CloseFrame::new(code, reason));
        self.enqueue_close(code, reason);

        let conn = self.clone();
        let timeout = self.inner.close_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = conn.closed() => {}
                () = tokio::time::sleep(timeout) => {
                    debug!(connection_id = %conn.id(), "Closing handshake timed out");
                    conn.finalize(true);
                }
            }
        });
    }

    /// Close with 1000 and no reason.
    pub fn close_normal(&self) {
        self.close(CloseCode::Normal, "");
    }

    /// Send a close frame and tear down immediately, without waiting for the
    /// peer to answer.
    pub fn terminate(&self, code: impl Into<u16>, reason: &str) {
        let code = code.into();
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        if self.advance(ReadyState::Closing) {
            self.enqueue_close(code, reason);
        }
        self.record_close(CloseFrame::new(code, reason));
        debug!(connection_id = %self.id(), code, reason, "Terminating connection");
        self.finalize(false);
    }

    /// Tear down after a stream failure. Reports 1006 and sends nothing.
    pub fn abort(&self, reason: &str) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        self.record_close(CloseFrame::new(CloseCode::Abnormal, reason));
        debug!(connection_id = %self.id(), reason, "Aborting connection");
        self.finalize(true);
    }

    fn enqueue_close(&self, code: u16, reason: &str) {
        let payload = if CloseCode::is_sendable(code) {
            frame::encode_close_payload(code, reason)
        } else {
            Bytes::new()
        };
        self.enqueue(frame::encode_frame(Opcode::Close, &payload), false);
    }

    fn record_close(&self, frame: CloseFrame) {
        let mut slot = self.inner.close_frame.lock();
        if slot.is_none() {
            *slot = Some(frame);
        }
    }

    /// Move the state forward. Returns false if `to` is not ahead of the
    /// current state.
    fn advance(&self, to: ReadyState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if to > *state {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.advance(ReadyState::Open)
    }

    /// Register a hook that runs once during teardown.
    pub(crate) fn on_teardown<F>(&self, hook: F)
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        if self.inner.finalized.load(Ordering::Acquire) {
            hook(self);
            return;
        }
        self.inner.teardown.lock().push(Box::new(hook));
    }

    /// Whether teardown has started. Set before any teardown hook runs.
    pub(crate) fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    pub(crate) fn set_writer(&self, handle: AbortHandle) {
        *self.inner.writer.lock() = Some(handle);
    }

    /// Run teardown exactly once: notify close listeners, run hooks, enter
    /// CLOSED, drop listeners. `abandon_writer` stops the writer without
    /// draining queued frames.
    pub(crate) fn finalize(&self, abandon_writer: bool) {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return;
        }

        let frame = self
            .inner
            .close_frame
            .lock()
            .get_or_insert_with(|| CloseFrame::new(CloseCode::Abnormal, ""))
            .clone();

        let close_listeners = self.inner.listeners.lock().close.clone();
        for listener in &close_listeners {
            listener(self, &frame);
        }

        let hooks = std::mem::take(&mut *self.inner.teardown.lock());
        for hook in hooks {
            hook(self);
        }

        self.inner.stats.record_closed(frame.code);
        self.inner
            .state
            .send_if_modified(|state| std::mem::replace(state, ReadyState::Closed) != ReadyState::Closed);
        *self.inner.listeners.lock() = Listeners::default();

        if abandon_writer {
            if let Some(writer) = self.inner.writer.lock().take() {
                writer.abort();
            }
        }

        debug!(
            connection_id = %self.id(),
            code = frame.code,
            reason = %frame.reason,
            "Connection closed"
        );
    }

    // ------------------------------------------------------------------
    // Inbound dispatch (driver side)
    // ------------------------------------------------------------------

    pub(crate) fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    pub(crate) fn mark_alive(&self) {
        *self.inner.last_pong.lock() = Instant::now();
        self.inner.alive.store(true, Ordering::Release);
    }

    pub(crate) fn mark_unresponsive(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    pub(crate) fn stats(&self) -> &StatsTracker {
        &self.inner.stats
    }

    pub(crate) fn dispatch_message(&self, message: &Message) {
        if !self.is_open() {
            return;
        }
        self.inner.stats.record_message_received();
        let listeners = self.inner.listeners.lock().message.clone();
        for listener in &listeners {
            listener(self, message);
        }
    }

    pub(crate) fn dispatch_ping(&self, payload: &Bytes) {
        self.mark_alive();
        if self.is_open() {
            self.enqueue(frame::encode_frame(Opcode::Pong, payload), false);
        }
        let listeners = self.inner.listeners.lock().ping.clone();
        for listener in &listeners {
            listener(self, payload);
        }
    }

    pub(crate) fn dispatch_pong(&self, payload: &Bytes) {
        self.mark_alive();
        let listeners = self.inner.listeners.lock().pong.clone();
        for listener in &listeners {
            listener(self, payload);
        }
    }

    pub(crate) fn dispatch_error(&self, error: &WsError) {
        let listeners = self.inner.listeners.lock().error.clone();
        for listener in &listeners {
            listener(self, error);
        }
    }

    /// The peer sent a close frame.
    pub(crate) fn dispatch_close(&self, status: Option<(u16, String)>) {
        if self.advance(ReadyState::Closing) {
            // Peer initiated: echo its code and tear down.
            match &status {
                Some((code, _)) => {
                    let payload = frame::encode_close_payload(*code, "");
                    self.enqueue(frame::encode_frame(Opcode::Close, &payload), false);
                }
                None => {
                    self.enqueue(frame::encode_frame(Opcode::Close, &[]), false);
                }
            }
            let (code, reason) = status.unwrap_or((CloseCode::Normal.as_u16(), String::new()));
            self.record_close(CloseFrame::new(code, reason));
        }
        // Otherwise this answers our own close; the recorded frame stands.
        self.finalize(false);
    }

    pub(crate) fn record_error(&self, error: &WsError) {
        let kind = match error {
            WsError::AbnormalDisconnect(_) | WsError::Io(_) => ErrorKind::Stream,
            WsError::Internal(_) => ErrorKind::Handler,
            _ => ErrorKind::Protocol,
        };
        self.inner.stats.record_error(kind);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("path", &self.path())
            .field("protocol", &self.inner.protocol)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use http::{Method, Uri};

    pub(crate) fn test_request(path: &str) -> UpgradeRequest {
        let uri: Uri = path.parse().unwrap();
        UpgradeRequest::new(Method::GET, uri, HeaderMap::new())
    }

    pub(crate) fn open_connection(
        registry: &Arc<RoomRegistry>,
    ) -> (Connection, mpsc::Receiver<OutboundFrame>) {
        let settings = ConnectionSettings {
            close_timeout: Duration::from_secs(5),
            send_queue_capacity: 4,
        };
        let (conn, rx) = Connection::new(
            test_request("/test"),
            None,
            &settings,
            Arc::clone(registry),
            Arc::new(StatsTracker::new()),
        );
        assert!(conn.mark_open());
        (conn, rx)
    }

    fn decode(frame: &OutboundFrame) -> frame::Frame {
        frame::decode_frame(&frame.bytes, usize::MAX)
            .unwrap()
            .unwrap()
            .0
    }

    #[test]
    fn test_connection_id_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(ConnectionId::from(a.as_uuid()), a);
    }

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::Connecting < ReadyState::Open);
        assert!(ReadyState::Open < ReadyState::Closing);
        assert!(ReadyState::Closing < ReadyState::Closed);
        assert_eq!(ReadyState::Closing.to_string(), "CLOSING");
    }

    #[tokio::test]
    async fn test_send_queues_encoded_frame() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, mut rx) = open_connection(&registry);

        assert_eq!(conn.send("hi").unwrap(), SendStatus::Queued);
        assert_eq!(conn.buffered_amount(), 4);

        let queued = rx.recv().await.unwrap();
        assert!(queued.data);
        let frame = decode(&queued);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_send_queue_full() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);

        for _ in 0..4 {
            conn.send("x").unwrap();
        }
        let err = conn.send("overflow").unwrap_err();
        assert!(matches!(err, WsError::SendQueueFull { capacity: 4 }));
        // control frames still fit
        assert_eq!(conn.ping(Bytes::new()).unwrap(), SendStatus::Queued);
    }

    #[tokio::test]
    async fn test_send_when_not_open_is_noop() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, mut rx) = open_connection(&registry);
        conn.terminate(CloseCode::Normal, "");

        assert_eq!(conn.send("late").unwrap(), SendStatus::NotOpen);
        // only the close frame was queued
        let frame = decode(&rx.recv().await.unwrap());
        assert_eq!(frame.opcode, Opcode::Close);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_control_payload_rejected() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);
        assert!(conn.ping(Bytes::from(vec![0u8; 126])).is_err());
    }

    #[tokio::test]
    async fn test_peer_close_echoes_and_notifies() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, mut rx) = open_connection(&registry);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        conn.on_close(move |_, frame| seen_clone.lock().push(frame.clone()));

        conn.dispatch_close(Some((4001, "done".to_string())));

        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert_eq!(seen.lock().as_slice(), &[CloseFrame::new(4001u16, "done")]);
        let echo = decode(&rx.recv().await.unwrap());
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(&echo.payload[..2], &4001u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_peer_close_without_status_reports_normal() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);
        conn.dispatch_close(None);
        assert_eq!(conn.close_frame(), Some(CloseFrame::normal()));
    }

    #[tokio::test]
    async fn test_close_listeners_run_once_and_are_cleared() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        conn.on_close(move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        conn.terminate(CloseCode::GoingAway, "bye");
        conn.terminate(CloseCode::GoingAway, "bye");
        conn.abort("again");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // registration after CLOSED is ignored
        conn.on_message(|_, _| panic!("never called"));
        conn.dispatch_message(&Message::text("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_times_out_without_answer() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, mut rx) = open_connection(&registry);

        conn.close(CloseCode::Normal, "shutting");
        assert_eq!(conn.ready_state(), ReadyState::Closing);
        let frame = decode(&rx.recv().await.unwrap());
        assert_eq!(
            frame::parse_close_payload(&frame.payload).unwrap(),
            Some((1000, "shutting".to_string()))
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert_eq!(conn.close_frame(), Some(CloseFrame::new(1000u16, "shutting")));
    }

    #[tokio::test]
    async fn test_close_answered_by_peer() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);

        conn.close(4000u16, "app");
        conn.dispatch_close(Some((1000, String::new())));

        assert_eq!(conn.ready_state(), ReadyState::Closed);
        // the locally chosen code is what the connection reports
        assert_eq!(conn.close_frame(), Some(CloseFrame::new(4000u16, "app")));
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_ping_marks_alive_and_queues_pong() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, mut rx) = open_connection(&registry);

        conn.mark_unresponsive();
        assert!(!conn.is_alive());
        conn.dispatch_ping(&Bytes::from_static(b"p"));
        assert!(conn.is_alive());

        let pong = decode(&rx.recv().await.unwrap());
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(&pong.payload[..], b"p");
    }

    #[tokio::test]
    async fn test_listeners_run_in_registration_order() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            conn.on_message(move |_, _| order.lock().push(i));
        }
        conn.dispatch_message(&Message::text("go"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_teardown_leaves_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let (conn, _rx) = open_connection(&registry);
        let hook_registry = Arc::clone(&registry);
        conn.on_teardown(move |conn| hook_registry.leave_all(conn));

        conn.join("lobby");
        assert!(conn.in_room("lobby"));
        conn.terminate(CloseCode::Normal, "");

        assert!(!conn.in_room("lobby"));
        assert!(!registry.contains("lobby"));
    }
}
