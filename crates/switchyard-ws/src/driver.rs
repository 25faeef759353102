//! Per-connection I/O tasks.
//!
//! Each established connection gets two tasks. The writer owns the write
//! half and drains the outgoing queue in order. The reader owns the read
//! half, runs the upgrade middleware, then polls the handler future and the
//! stream together, decoding frames and dispatching them in arrival order.
//! Both tasks end once the connection reaches CLOSED, which drops the two
//! halves and releases the stream.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::future::OptionFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, OutboundFrame, ReadyState};
use crate::error::{CloseCode, WsError, WsResult};
use crate::frame::{self, Frame, Opcode};
use crate::message::Message;
use crate::middleware::{run_chain, UpgradeMiddleware};
use crate::request::UpgradeRequest;
use crate::route::{BoxFuture, WsHandler};

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// Framing limits applied by the reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLimits {
    pub(crate) max_message_size: usize,
    pub(crate) accept_unmasked_frames: bool,
}

/// What runs on the connection once it is established.
pub(crate) struct Application {
    pub(crate) middleware: Arc<[Arc<dyn UpgradeMiddleware>]>,
    pub(crate) handler: Arc<dyn WsHandler>,
    pub(crate) request: UpgradeRequest,
}

/// Start the reader and writer tasks for `conn` over `stream`.
///
/// `buffered` holds bytes already read past the end of the handshake.
pub(crate) fn spawn<S>(
    stream: S,
    buffered: BytesMut,
    conn: Connection,
    outbound: mpsc::Receiver<OutboundFrame>,
    limits: FrameLimits,
    app: Application,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);

    let writer_task = tokio::spawn(write_loop(conn.clone(), writer, outbound));
    conn.set_writer(writer_task.abort_handle());

    tokio::spawn(read_loop(conn, reader, buffered, limits, app));
}

async fn write_loop<S>(conn: Connection, mut writer: WriteHalf<S>, mut outbound: mpsc::Receiver<OutboundFrame>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let closed = conn.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => {
                let Some(frame) = next else { break };
                if let Err(e) = write_frame(&conn, &mut writer, frame).await {
                    let error = WsError::from(e);
                    conn.record_error(&error);
                    conn.dispatch_error(&error);
                    conn.abort("write failed");
                    return;
                }
            }
            () = &mut closed => {
                // Flush whatever was queued before CLOSED, typically the close frame.
                while let Ok(frame) = outbound.try_recv() {
                    if write_frame(&conn, &mut writer, frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}

async fn write_frame<W>(conn: &Connection, writer: &mut W, frame: OutboundFrame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.bytes).await?;
    writer.flush().await?;
    conn.frame_written(frame.bytes.len(), frame.data);
    Ok(())
}

/// A fragmented message being reassembled.
struct Assembly {
    opcode: Opcode,
    payload: BytesMut,
}

/// Reader-side protocol state.
struct FrameHandler {
    limits: FrameLimits,
    assembly: Option<Assembly>,
}

impl FrameHandler {
    fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            assembly: None,
        }
    }

    /// Decode and dispatch every complete frame in `buf`.
    fn process(&mut self, conn: &Connection, buf: &mut BytesMut) -> WsResult<()> {
        while conn.ready_state() != ReadyState::Closed {
            let Some((frame, consumed)) = frame::decode_frame(buf, self.limits.max_message_size)? else {
                break;
            };
            buf.advance(consumed);
            self.handle(conn, frame)?;
        }
        Ok(())
    }

    fn handle(&mut self, conn: &Connection, frame: Frame) -> WsResult<()> {
        if !frame.masked && !self.limits.accept_unmasked_frames {
            return Err(WsError::protocol("client frame is not masked"));
        }
        conn.touch();

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.assembly.is_some() {
                    return Err(WsError::protocol("new data frame while a fragmented message is in progress"));
                }
                if frame.fin {
                    let message = build_message(frame.opcode, frame.payload)?;
                    conn.dispatch_message(&message);
                } else {
                    self.assembly = Some(Assembly {
                        opcode: frame.opcode,
                        payload: BytesMut::from(&frame.payload[..]),
                    });
                }
            }
            Opcode::Continuation => {
                let Some(assembly) = self.assembly.as_mut() else {
                    return Err(WsError::protocol("continuation frame without a message in progress"));
                };
                let total = assembly.payload.len() + frame.payload.len();
                if total > self.limits.max_message_size {
                    return Err(WsError::message_too_large(total as u64, self.limits.max_message_size));
                }
                assembly.payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    if let Some(done) = self.assembly.take() {
                        let message = build_message(done.opcode, done.payload.freeze())?;
                        conn.dispatch_message(&message);
                    }
                }
            }
            Opcode::Ping => conn.dispatch_ping(&frame.payload),
            Opcode::Pong => conn.dispatch_pong(&frame.payload),
            Opcode::Close => {
                let status = frame::parse_close_payload(&frame.payload)?;
                conn.dispatch_close(status);
            }
        }
        Ok(())
    }
}

fn build_message(opcode: Opcode, payload: Bytes) -> WsResult<Message> {
    if opcode == Opcode::Text {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|_| WsError::invalid_payload("text message is not valid UTF-8"))?;
        Ok(Message::Text(text))
    } else {
        Ok(Message::Binary(payload))
    }
}

/// Close the connection because of a protocol-level failure.
fn fail(conn: &Connection, error: &WsError) {
    conn.record_error(error);
    conn.dispatch_error(error);
    match error {
        WsError::AbnormalDisconnect(_) | WsError::Io(_) => conn.abort(&error.to_string()),
        _ => conn.terminate(error.close_code(), &error.to_string()),
    }
}

/// Close the connection because the application failed.
fn fail_application(conn: &Connection, error: &WsError) {
    warn!(connection_id = %conn.id(), error = %error, "Handler failed");
    conn.record_error(error);
    conn.dispatch_error(error);
    conn.close(CloseCode::InternalError, "internal error");
}

fn panic_error(what: &str) -> WsError {
    WsError::internal(format!("{what} panicked"))
}

type HandlerFuture = BoxFuture<'static, std::thread::Result<WsResult<()>>>;

async fn read_loop<S>(conn: Connection, mut reader: ReadHalf<S>, mut buf: BytesMut, limits: FrameLimits, app: Application)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let Application {
        middleware,
        handler,
        request,
    } = app;

    // Middleware runs to completion before anything is read.
    let chain = AssertUnwindSafe(run_chain(&middleware, &conn, &request))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(panic_error("middleware")));

    let mut handler_fut: Option<HandlerFuture> = match chain {
        Ok(()) => Some(
            AssertUnwindSafe(handler.call(conn.clone(), request))
                .catch_unwind()
                .boxed(),
        ),
        Err(e) => {
            fail_application(&conn, &e);
            None
        }
    };

    let mut frames = FrameHandler::new(limits);
    let closed = conn.closed();
    tokio::pin!(closed);

    // Bytes that arrived with the handshake.
    if let Err(e) = frames.process(&conn, &mut buf) {
        fail(&conn, &e);
    }
    buf.reserve(READ_CHUNK);

    loop {
        tokio::select! {
            biased;
            Some(result) = OptionFuture::from(handler_fut.as_mut()), if handler_fut.is_some() => {
                handler_fut = None;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => fail_application(&conn, &e),
                    Err(_) => fail_application(&conn, &panic_error("handler")),
                }
            }
            () = &mut closed => break,
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => {
                        fail(&conn, &WsError::abnormal("stream ended without a close frame"));
                        break;
                    }
                    Ok(n) => {
                        conn.stats().record_bytes_received(n);
                        if let Err(e) = frames.process(&conn, &mut buf) {
                            fail(&conn, &e);
                        }
                        if buf.capacity() - buf.len() < READ_CHUNK {
                            buf.reserve(READ_CHUNK);
                        }
                    }
                    Err(e) => {
                        fail(&conn, &WsError::from(e));
                        break;
                    }
                }
            }
        }
    }

    // The handler outlives the stream; its sends are now no-ops.
    if let Some(remaining) = handler_fut {
        let id = conn.id();
        tokio::spawn(async move {
            match remaining.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection_id = %id, error = %e, "Handler failed after close"),
                Err(_) => warn!(connection_id = %id, "Handler panicked after close"),
            }
        });
    }
    debug!(connection_id = %conn.id(), "Reader finished");
}
