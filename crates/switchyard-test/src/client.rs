//! Client-role WebSocket test client.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use switchyard_ws::frame::{self, Frame, Opcode};
use switchyard_ws::{Connection, Message, WsServer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::error::{TestClientError, TestResult};
use crate::request::UpgradeRequestBuilder;
use crate::response::{head_end, HandshakeResponse};

/// Default time to wait for the server before failing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest frame the client accepts from the server.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Buffer size of in-memory streams.
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// A WebSocket client that speaks the client side of RFC 6455.
///
/// Every frame it sends is masked, as a browser would. Raw bytes can be sent
/// with [`send_raw`](Self::send_raw) to exercise protocol errors.
///
/// # Example
///
/// ```ignore
/// use switchyard_test::{UpgradeRequestBuilder, WsTestClient};
///
/// let mut client = WsTestClient::in_memory(&server, &UpgradeRequestBuilder::new("/chat/lobby")).await?;
/// client.send_text("hello").await?;
/// let reply = client.recv_message().await?;
/// assert_eq!(reply.as_text(), Some("hello"));
/// ```
#[must_use]
pub struct WsTestClient<S = TcpStream> {
    stream: S,
    buf: BytesMut,
    response: HandshakeResponse,
    timeout: Duration,
    server_conn: Option<Connection>,
}

impl WsTestClient<TcpStream> {
    /// Connect over TCP and perform the opening handshake.
    pub async fn connect(addr: SocketAddr, request: &UpgradeRequestBuilder) -> TestResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::handshake(stream, request).await
    }
}

impl WsTestClient<DuplexStream> {
    /// Upgrade against `server` over an in-memory stream.
    ///
    /// The server-side [`Connection`] is available through
    /// [`server_connection`](Self::server_connection).
    pub async fn in_memory(server: &WsServer, request: &UpgradeRequestBuilder) -> TestResult<Self> {
        let (client_io, server_io) = tokio::io::duplex(DUPLEX_CAPACITY);
        let upgrade = request.build()?;
        let server = server.clone();
        let task = tokio::spawn(async move {
            server
                .handle_upgrade(upgrade, server_io, BytesMut::new())
                .await
        });

        let mut client = Self::handshake(client_io, request).await?;
        if let Ok(Ok(conn)) = task.await {
            client.server_conn = Some(conn);
        }
        Ok(client)
    }

    /// Send `request` to `server` over an in-memory stream and return the
    /// response whatever its status.
    pub async fn in_memory_response(
        server: &WsServer,
        request: &UpgradeRequestBuilder,
    ) -> TestResult<HandshakeResponse> {
        let (mut client_io, server_io) = tokio::io::duplex(DUPLEX_CAPACITY);
        let upgrade = request.build()?;
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server
                .handle_upgrade(upgrade, server_io, BytesMut::new())
                .await;
        });

        let (response, _rest) = read_response(&mut client_io, DEFAULT_TIMEOUT).await?;
        Ok(response)
    }
}

impl<S> WsTestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Write the upgrade request to `stream` and read the response.
    ///
    /// Fails with [`TestClientError::Rejected`] unless the server answers
    /// `101` with the expected accept value.
    pub async fn handshake(mut stream: S, request: &UpgradeRequestBuilder) -> TestResult<Self> {
        stream.write_all(&request.to_bytes()?).await?;
        stream.flush().await?;

        let (response, buf) = read_response(&mut stream, DEFAULT_TIMEOUT).await?;
        if !response.is_switching_protocols() {
            return Err(TestClientError::Rejected(response.status_code()));
        }
        if !response.accepts_key(request.client_key()) {
            return Err(TestClientError::MalformedResponse(
                "Sec-WebSocket-Accept does not match the key".into(),
            ));
        }

        Ok(Self {
            stream,
            buf,
            response,
            timeout: DEFAULT_TIMEOUT,
            server_conn: None,
        })
    }

    /// Change how long receives wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `101` response.
    pub fn response(&self) -> &HandshakeResponse {
        &self.response
    }

    /// The negotiated sub-protocol.
    pub fn protocol(&self) -> Option<&str> {
        self.response.protocol()
    }

    /// The server-side connection, for in-memory clients.
    pub fn server_connection(&self) -> Option<&Connection> {
        self.server_conn.as_ref()
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send one masked frame.
    pub async fn send_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) -> TestResult<()> {
        let bytes = frame::encode_frame_with(fin, opcode, payload, Some(mask_key()));
        self.send_raw(&bytes).await
    }

    /// Write bytes to the stream unchanged.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> TestResult<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a text message.
    pub async fn send_text(&mut self, text: &str) -> TestResult<()> {
        self.send_frame(true, Opcode::Text, text.as_bytes()).await
    }

    /// Send a binary message.
    pub async fn send_binary(&mut self, data: &[u8]) -> TestResult<()> {
        self.send_frame(true, Opcode::Binary, data).await
    }

    /// Send a value as a JSON text message.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> TestResult<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(&text).await
    }

    /// Send a ping.
    pub async fn ping(&mut self, payload: &[u8]) -> TestResult<()> {
        self.send_frame(true, Opcode::Ping, payload).await
    }

    /// Send a pong.
    pub async fn pong(&mut self, payload: &[u8]) -> TestResult<()> {
        self.send_frame(true, Opcode::Pong, payload).await
    }

    /// Send a close frame.
    pub async fn close(&mut self, code: u16, reason: &str) -> TestResult<()> {
        let payload = frame::encode_close_payload(code, reason);
        self.send_frame(true, Opcode::Close, &payload).await
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Receive the next frame of any kind.
    pub async fn recv_frame(&mut self) -> TestResult<Frame> {
        loop {
            if let Some((frame, consumed)) = frame::decode_frame(&self.buf, MAX_FRAME_SIZE)? {
                self.buf.advance(consumed);
                return Ok(frame);
            }
            if self.fill().await? == 0 {
                return Err(TestClientError::Eof);
            }
        }
    }

    /// Receive the next data message, skipping pings and pongs.
    pub async fn recv_message(&mut self) -> TestResult<Message> {
        loop {
            let frame = self.recv_frame().await?;
            match frame.opcode {
                Opcode::Ping | Opcode::Pong => continue,
                Opcode::Text => {
                    let text = String::from_utf8(frame.payload.to_vec()).map_err(|_| {
                        TestClientError::Unexpected("text frame with invalid UTF-8".into())
                    })?;
                    return Ok(Message::Text(text));
                }
                Opcode::Binary => return Ok(Message::Binary(frame.payload)),
                Opcode::Close => {
                    let status = frame::parse_close_payload(&frame.payload)?;
                    return Err(TestClientError::Unexpected(format!("close {status:?}")));
                }
                Opcode::Continuation => {
                    return Err(TestClientError::Unexpected("continuation frame".into()));
                }
            }
        }
    }

    /// Receive the next text message.
    pub async fn recv_text(&mut self) -> TestResult<String> {
        match self.recv_message().await? {
            Message::Text(text) => Ok(text),
            Message::Binary(_) => Err(TestClientError::Unexpected("binary message".into())),
        }
    }

    /// Receive the next text message as JSON.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> TestResult<T> {
        let text = self.recv_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Receive frames until a close frame arrives, returning its status.
    pub async fn recv_close(&mut self) -> TestResult<Option<(u16, String)>> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.opcode == Opcode::Close {
                return Ok(frame::parse_close_payload(&frame.payload)?);
            }
        }
    }

    /// Wait for the server to close the stream, discarding anything sent.
    pub async fn expect_eof(&mut self) -> TestResult<()> {
        loop {
            if self.fill().await? == 0 {
                return Ok(());
            }
            self.buf.clear();
        }
    }

    /// Check that nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> TestResult<()> {
        if !self.buf.is_empty() {
            return Err(TestClientError::Unexpected("buffered data".into()));
        }
        let mut chunk = [0u8; 1];
        match tokio::time::timeout(wait, self.stream.read(&mut chunk)).await {
            Err(_) => Ok(()),
            Ok(Ok(0)) => Err(TestClientError::Eof),
            Ok(Ok(_)) => Err(TestClientError::Unexpected("data arrived".into())),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Close the handshake from the client side and wait for the echo.
    pub async fn close_and_wait(&mut self, code: u16, reason: &str) -> TestResult<Option<(u16, String)>> {
        self.close(code, reason).await?;
        self.recv_close().await
    }

    /// Take back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill(&mut self) -> TestResult<usize> {
        self.buf.reserve(8 * 1024);
        match tokio::time::timeout(self.timeout, self.stream.read_buf(&mut self.buf)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TestClientError::Timeout),
        }
    }
}

impl<S> std::fmt::Debug for WsTestClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTestClient")
            .field("status", &self.response.status())
            .field("buffered", &self.buf.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Read a response head from `stream`.
///
/// Returns the parsed response and any bytes read past the head.
pub async fn read_response<S>(stream: &mut S, timeout: Duration) -> TestResult<(HandshakeResponse, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = head_end(&buf) {
            let response = HandshakeResponse::parse(&buf[..end])?;
            buf.advance(end);
            return Ok((response, buf));
        }
        let n = tokio::time::timeout(timeout, stream.read_buf(&mut buf))
            .await
            .map_err(|_| TestClientError::Timeout)??;
        if n == 0 {
            return Err(TestClientError::Eof);
        }
    }
}

fn mask_key() -> [u8; 4] {
    let bytes = Uuid::now_v7().into_bytes();
    [bytes[12], bytes[13], bytes[14], bytes[15]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_ws::handshake::compute_accept_key;

    async fn read_request(io: &mut DuplexStream) {
        let mut buf = BytesMut::new();
        while head_end(&buf).is_none() {
            if io.read_buf(&mut buf).await.unwrap() == 0 {
                return;
            }
        }
    }

    async fn fake_server(mut io: DuplexStream, frames: Vec<u8>) -> DuplexStream {
        read_request(&mut io).await;
        let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        let head = format!("HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {accept}\r\n\r\n");
        io.write_all(head.as_bytes()).await.unwrap();
        io.write_all(&frames).await.unwrap();
        io
    }

    fn request() -> UpgradeRequestBuilder {
        UpgradeRequestBuilder::new("/ws").key("dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[tokio::test]
    async fn test_handshake_and_recv() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut frames = frame::encode_frame(Opcode::Ping, b"").to_vec();
        frames.extend_from_slice(&frame::encode_frame(Opcode::Text, b"hi"));
        let server = tokio::spawn(fake_server(server_io, frames));

        let mut client = WsTestClient::handshake(client_io, &request()).await.unwrap();
        assert!(client.response().is_switching_protocols());
        assert_eq!(client.recv_text().await.unwrap(), "hi");
        drop(server);
    }

    #[tokio::test]
    async fn test_sent_frames_are_masked() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(fake_server(server_io, Vec::new()));
        let mut client = WsTestClient::handshake(client_io, &request()).await.unwrap();
        let mut server_io = server.await.unwrap();

        client.send_text("abc").await.unwrap();
        let mut buf = [0u8; 9];
        server_io.read_exact(&mut buf).await.unwrap();
        let (frame, used) = frame::decode_frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(used, 9);
        assert!(frame.masked);
        assert_eq!(&frame.payload[..], b"abc");
    }

    #[tokio::test]
    async fn test_eof_is_reported() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(fake_server(server_io, Vec::new()));
        let mut client = WsTestClient::handshake(client_io, &request()).await.unwrap();
        drop(server.await.unwrap());
        assert!(matches!(client.recv_frame().await, Err(TestClientError::Eof)));
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server_io).await;
            server_io
                .write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });
        let err = WsTestClient::handshake(client_io, &request()).await.unwrap_err();
        assert!(matches!(err, TestClientError::Rejected(404)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(fake_server(server_io, Vec::new()));
        let mut client = WsTestClient::handshake(client_io, &request())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let _server_io = server.await.unwrap();
        assert!(matches!(client.recv_frame().await, Err(TestClientError::Timeout)));
    }
}
