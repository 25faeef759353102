//! Upgrade admission integration tests.
//!
//! Every rejection must answer with the right status, close the stream, and
//! leave no connection behind.

use http::header;
use switchyard_test::{HandshakeResponse, UpgradeRequestBuilder, WsTestClient};
use switchyard_ws::{Connection, OriginRule, UpgradeRequest, WsConfig, WsError, WsServer};

fn server(config: WsConfig) -> WsServer {
    let server = WsServer::new(config);
    server.route("/ws", |_conn: Connection, _req: UpgradeRequest| async {
        Ok::<(), WsError>(())
    });
    server
}

async fn respond(server: &WsServer, request: UpgradeRequestBuilder) -> HandshakeResponse {
    WsTestClient::in_memory_response(server, &request)
        .await
        .unwrap()
}

fn assert_no_connection(server: &WsServer) {
    assert!(server.connections().is_empty());
    assert_eq!(server.stats().connections_accepted, 0);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let server = server(WsConfig::default());
    let response = respond(&server, UpgradeRequestBuilder::new("/elsewhere")).await;
    response.assert_status(404).assert_header("connection", "close");
    assert_no_connection(&server);
    assert_eq!(server.stats().rejections.get(&404), Some(&1));
}

#[tokio::test]
async fn test_missing_headers_are_400() {
    let server = server(WsConfig::default());

    for missing in [
        header::UPGRADE,
        header::CONNECTION,
        header::HeaderName::from_static("sec-websocket-key"),
    ] {
        let response = respond(&server, UpgradeRequestBuilder::new("/ws").without(missing)).await;
        response.assert_status(400);
        assert_eq!(response.header_str("sec-websocket-version"), None);
    }
    assert_no_connection(&server);
    assert_eq!(server.stats().rejections.get(&400), Some(&3));
}

#[tokio::test]
async fn test_wrong_version_advertises_13() {
    let server = server(WsConfig::default());
    let response = respond(&server, UpgradeRequestBuilder::new("/ws").version("8")).await;
    response
        .assert_status(400)
        .assert_header("sec-websocket-version", "13");
    assert_no_connection(&server);
}

#[tokio::test]
async fn test_origin_allow_list() {
    let server = server(
        WsConfig::default()
            .allow_origin("https://app.example")
            .allow_origin_rule(OriginRule::parse("*.trusted.example").unwrap()),
    );

    respond(&server, UpgradeRequestBuilder::new("/ws"))
        .await
        .assert_status(403);
    respond(&server, UpgradeRequestBuilder::new("/ws").origin("https://evil.example"))
        .await
        .assert_status(403);
    assert_no_connection(&server);

    respond(&server, UpgradeRequestBuilder::new("/ws").origin("HTTPS://APP.EXAMPLE"))
        .await
        .assert_status(101);
    respond(
        &server,
        UpgradeRequestBuilder::new("/ws").origin("https://eu.trusted.example"),
    )
    .await
    .assert_status(101);
}

#[tokio::test]
async fn test_verifier_rejection_is_401() {
    let server = server(WsConfig::default());
    server.verify_client(|req: UpgradeRequest| async move {
        req.header("authorization") == Some("Bearer letmein")
    });

    respond(&server, UpgradeRequestBuilder::new("/ws"))
        .await
        .assert_status(401);
    assert_no_connection(&server);

    respond(
        &server,
        UpgradeRequestBuilder::new("/ws").header("Authorization", "Bearer letmein"),
    )
    .await
    .assert_status(101);
}

#[tokio::test]
async fn test_capacity_is_503() {
    let server = server(WsConfig::default().max_connections(1));

    let first = WsTestClient::in_memory(&server, &UpgradeRequestBuilder::new("/ws"))
        .await
        .unwrap();
    respond(&server, UpgradeRequestBuilder::new("/ws"))
        .await
        .assert_status(503);
    assert_eq!(server.connections().len(), 1);

    // Closing the first connection frees the slot.
    let conn = first.server_connection().cloned().unwrap();
    conn.terminate(1000u16, "");
    conn.closed().await;
    respond(&server, UpgradeRequestBuilder::new("/ws"))
        .await
        .assert_status(101);
}

#[tokio::test]
async fn test_rejected_stream_is_closed() {
    let server = server(WsConfig::default());
    let (mut client_io, server_io) = tokio::io::duplex(4096);
    let request = UpgradeRequestBuilder::new("/missing").build().unwrap();

    let err = server
        .handle_upgrade(request, server_io, bytes::BytesMut::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WsError::RouteNotFound { .. }));

    let (response, rest) = switchyard_test::read_response(&mut client_io, switchyard_test::DEFAULT_TIMEOUT)
        .await
        .unwrap();
    response.assert_status(404);
    assert!(rest.is_empty());

    let mut tail = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client_io, &mut tail)
        .await
        .unwrap();
    assert!(tail.is_empty());
}

#[tokio::test]
async fn test_subprotocol_negotiation() {
    let server = server(WsConfig::default().protocol("chat.v2").protocol("chat.v1"));

    // The first client offer that the server supports wins.
    let client = WsTestClient::in_memory(
        &server,
        &UpgradeRequestBuilder::new("/ws")
            .protocol("chat.v3")
            .protocol("chat.v1")
            .protocol("chat.v2"),
    )
    .await
    .unwrap();
    assert_eq!(client.protocol(), Some("chat.v1"));
    assert_eq!(client.server_connection().map(Connection::protocol), Some("chat.v1"));

    let plain = WsTestClient::in_memory(&server, &UpgradeRequestBuilder::new("/ws").protocol("other"))
        .await
        .unwrap();
    assert_eq!(plain.protocol(), None);
    assert_eq!(plain.server_connection().map(Connection::protocol), Some(""));
}

#[tokio::test]
async fn test_accept_key_matches_rfc_vector() {
    let server = server(WsConfig::default());
    let response = respond(
        &server,
        UpgradeRequestBuilder::new("/ws").key("dGhlIHNhbXBsZSBub25jZQ=="),
    )
    .await;
    response
        .assert_status(101)
        .assert_header("upgrade", "websocket")
        .assert_header("sec-websocket-accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
}
