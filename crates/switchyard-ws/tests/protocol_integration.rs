//! Frame-level protocol integration tests.
//!
//! These drive a real connection through the test client and check the close
//! codes the engine answers protocol violations with.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use switchyard_test::{UpgradeRequestBuilder, WsTestClient};
use switchyard_ws::frame::{self, Opcode};
use switchyard_ws::middleware::Next;
use switchyard_ws::{
    BoxFuture, CloseFrame, Connection, ReadyState, UpgradeMiddleware, UpgradeRequest, WsConfig,
    WsError, WsResult, WsServer,
};
use tokio::io::DuplexStream;

/// Echo every message back and remember how the connection closed.
fn echo_server(config: WsConfig) -> (WsServer, Arc<Mutex<Vec<CloseFrame>>>) {
    let closes = Arc::new(Mutex::new(Vec::new()));
    let server = WsServer::new(config);
    let seen = Arc::clone(&closes);
    server.route("/echo", move |conn: Connection, _req: UpgradeRequest| {
        let seen = Arc::clone(&seen);
        async move {
            conn.on_message(|conn, msg| {
                let _ = conn.send(msg.clone());
            });
            conn.on_close(move |_conn, frame| seen.lock().push(frame.clone()));
            Ok::<(), WsError>(())
        }
    });
    server.route("/fail", |_conn: Connection, _req: UpgradeRequest| async {
        Err::<(), WsError>(WsError::internal("handler exploded"))
    });
    (server, closes)
}

async fn connect(server: &WsServer, path: &str) -> WsTestClient<DuplexStream> {
    WsTestClient::in_memory(server, &UpgradeRequestBuilder::new(path))
        .await
        .unwrap()
}

async fn close_code(client: &mut WsTestClient<DuplexStream>) -> Option<u16> {
    client.recv_close().await.unwrap().map(|(code, _)| code)
}

#[tokio::test]
async fn test_echo_text_and_binary() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client.send_text("héllo").await.unwrap();
    assert_eq!(client.recv_text().await.unwrap(), "héllo");

    client.send_binary(&[0, 1, 2, 255]).await.unwrap();
    let reply = client.recv_message().await.unwrap();
    assert_eq!(reply.as_bytes(), &[0, 1, 2, 255]);

    let stats = server.stats();
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.messages_sent, 2);
}

#[tokio::test]
async fn test_large_message_uses_extended_lengths() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    for size in [125usize, 126, 65_535, 65_536] {
        let payload = vec![b'x'; size];
        client.send_binary(&payload).await.unwrap();
        let reply = client.recv_frame().await.unwrap();
        assert_eq!(reply.payload_length, size as u64);
        assert_eq!(reply.payload.len(), size);
    }
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client.ping(b"are you there").await.unwrap();
    let pong = client.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(&pong.payload[..], b"are you there");
}

#[tokio::test]
async fn test_fragmented_message_is_reassembled() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client.send_frame(false, Opcode::Text, b"hel").await.unwrap();
    client.ping(b"mid").await.unwrap();
    client.send_frame(false, Opcode::Continuation, b"lo ").await.unwrap();
    client.send_frame(true, Opcode::Continuation, b"world").await.unwrap();

    let pong = client.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(client.recv_text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_client_close_is_echoed() {
    let (server, closes) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;
    let conn = client.server_connection().cloned().unwrap();

    let echoed = client.close_and_wait(4001, "done").await.unwrap();
    assert_eq!(echoed.map(|(code, _)| code), Some(4001));
    client.expect_eof().await.unwrap();

    conn.closed().await;
    assert_eq!(conn.ready_state(), ReadyState::Closed);
    assert_eq!(closes.lock().as_slice(), &[CloseFrame::new(4001u16, "done")]);
    assert_eq!(server.stats().connections_closed, 1);
}

#[tokio::test]
async fn test_empty_close_reports_normal() {
    let (server, closes) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;
    let conn = client.server_connection().cloned().unwrap();

    client.send_frame(true, Opcode::Close, b"").await.unwrap();
    assert_eq!(client.recv_close().await.unwrap(), None);
    conn.closed().await;
    assert_eq!(closes.lock()[0].code, 1000);
}

#[tokio::test]
async fn test_server_close_handshake() {
    let (server, closes) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;
    let conn = client.server_connection().cloned().unwrap();

    conn.close(4000u16, "bye");
    assert_eq!(conn.ready_state(), ReadyState::Closing);
    assert!(!conn.send("late").unwrap().is_queued());

    let status = client.recv_close().await.unwrap();
    assert_eq!(status, Some((4000, "bye".to_string())));
    client.close(4000, "bye").await.unwrap();
    client.expect_eof().await.unwrap();

    conn.closed().await;
    assert_eq!(closes.lock()[0].code, 4000);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_times_out() {
    let (server, _) = echo_server(WsConfig::default().close_timeout(Duration::from_secs(2)));
    let mut client = connect(&server, "/echo")
        .await
        .with_timeout(Duration::from_secs(60));
    let conn = client.server_connection().cloned().unwrap();

    conn.close(1000u16, "");
    assert_eq!(close_code(&mut client).await, Some(1000));

    // The client never answers; the grace timeout releases the stream.
    conn.closed().await;
    client.expect_eof().await.unwrap();
    assert!(server.connections().is_empty());
}

#[tokio::test]
async fn test_oversized_message_is_1009() {
    let (server, closes) = echo_server(WsConfig::default().max_message_size(16));
    let mut client = connect(&server, "/echo").await;

    client.send_text(&"x".repeat(32)).await.unwrap();
    assert_eq!(close_code(&mut client).await, Some(1009));
    client.expect_eof().await.unwrap();
    assert_eq!(closes.lock()[0].code, 1009);
}

#[tokio::test]
async fn test_oversized_fragments_are_1009() {
    let (server, _) = echo_server(WsConfig::default().max_message_size(16));
    let mut client = connect(&server, "/echo").await;

    client.send_frame(false, Opcode::Text, &[b'a'; 10]).await.unwrap();
    client.send_frame(true, Opcode::Continuation, &[b'b'; 10]).await.unwrap();
    assert_eq!(close_code(&mut client).await, Some(1009));
}

#[tokio::test]
async fn test_unmasked_frame_is_1002() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client
        .send_raw(&frame::encode_frame(Opcode::Text, b"naked"))
        .await
        .unwrap();
    assert_eq!(close_code(&mut client).await, Some(1002));
}

#[tokio::test]
async fn test_unmasked_frames_when_allowed() {
    let (server, _) = echo_server(WsConfig::default().accept_unmasked_frames(true));
    let mut client = connect(&server, "/echo").await;

    client
        .send_raw(&frame::encode_frame(Opcode::Text, b"naked"))
        .await
        .unwrap();
    assert_eq!(client.recv_text().await.unwrap(), "naked");
}

#[tokio::test]
async fn test_reserved_opcode_is_1002() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    // FIN + opcode 0x3, masked, empty payload.
    client.send_raw(&[0x83, 0x80, 1, 2, 3, 4]).await.unwrap();
    assert_eq!(close_code(&mut client).await, Some(1002));
}

#[tokio::test]
async fn test_invalid_utf8_is_1007() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client
        .send_frame(true, Opcode::Text, &[0xff, 0xfe, 0xfd])
        .await
        .unwrap();
    assert_eq!(close_code(&mut client).await, Some(1007));
}

#[tokio::test]
async fn test_stray_continuation_is_1002() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/echo").await;

    client
        .send_frame(true, Opcode::Continuation, b"orphan")
        .await
        .unwrap();
    assert_eq!(close_code(&mut client).await, Some(1002));
    assert_eq!(server.stats().protocol_errors, 1);
}

#[tokio::test]
async fn test_handler_error_is_1011() {
    let (server, _) = echo_server(WsConfig::default());
    let mut client = connect(&server, "/fail").await;
    assert_eq!(close_code(&mut client).await, Some(1011));
}

#[tokio::test]
async fn test_dropped_stream_is_abnormal() {
    let (server, closes) = echo_server(WsConfig::default());
    let client = connect(&server, "/echo").await;
    let conn = client.server_connection().cloned().unwrap();

    drop(client);
    conn.closed().await;
    assert_eq!(closes.lock()[0].code, 1006);
    assert!(server.connections().is_empty());
}

struct Tag {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    proceed: bool,
}

impl UpgradeMiddleware for Tag {
    fn name(&self) -> &'static str {
        self.label
    }

    fn process<'a>(
        &'a self,
        _conn: &'a Connection,
        _request: &'a UpgradeRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move {
            self.log.lock().push(self.label);
            if self.proceed {
                next.run().await
            } else {
                Ok(())
            }
        })
    }
}

fn middleware_server(stages: &[(&'static str, bool)]) -> (WsServer, Arc<Mutex<Vec<&'static str>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = WsServer::new(WsConfig::default());
    for &(label, proceed) in stages {
        server.use_middleware(Tag {
            label,
            log: Arc::clone(&log),
            proceed,
        });
    }
    let handler_log = Arc::clone(&log);
    server.route("/ws", move |_conn: Connection, _req: UpgradeRequest| {
        let log = Arc::clone(&handler_log);
        async move {
            log.lock().push("handler");
            Ok::<(), WsError>(())
        }
    });
    (server, log)
}

#[tokio::test]
async fn test_middleware_runs_in_order_before_handler() {
    let (server, log) = middleware_server(&[("auth", true), ("audit", true)]);
    let mut client = connect(&server, "/ws").await;

    client.ping(b"sync").await.unwrap();
    client.recv_frame().await.unwrap();
    assert_eq!(*log.lock(), vec!["auth", "audit", "handler"]);
}

#[tokio::test]
async fn test_middleware_without_next_is_1011() {
    let (server, log) = middleware_server(&[("gate", false), ("never", true)]);
    let mut client = connect(&server, "/ws").await;

    assert_eq!(close_code(&mut client).await, Some(1011));
    assert_eq!(*log.lock(), vec!["gate"]);
}
