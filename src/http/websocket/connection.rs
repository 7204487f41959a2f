//! Terminated WebSocket connections.
//!
//! # Data Flow
//! ```text
//! socket ─read─▶ ConnectionDriver ─▶ FrameDecoder ─▶ MessageAssembler ─▶ message handlers
//!                      │ ping → pong, close → echo + close handlers
//!                      ▼
//! WebSocketConnection::send ─▶ mpsc ─▶ writer task ─write─▶ socket
//! ```
//!
//! # Design Decisions
//! - One reader (the driver) and one writer task per connection
//! - Handlers are called outside the handler lock, so a handler may call
//!   `send`, `close` or register more handlers
//! - Close handlers fire exactly once; handler lists are cleared afterwards

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::http::websocket::frame::{
    close_payload, encode_frame, parse_close_payload, FrameDecoder, FrameError, MessageAssembler,
    OpCode,
};

/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("connection is not open")]
    Closed,

    #[error("websocket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
type CloseHandler = Arc<dyn Fn(u16, &str) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&WebSocketError) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    message: Vec<MessageHandler>,
    close: Vec<CloseHandler>,
    error: Vec<ErrorHandler>,
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

struct Shared {
    state: AtomicU8,
    close_fired: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
    handlers: Mutex<Handlers>,
    stop_reading: Notify,
    closed_tx: watch::Sender<bool>,
}

/// Handle to a terminated WebSocket connection. Clones share the connection.
#[derive(Clone)]
pub struct WebSocketConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl WebSocketConnection {
    /// Split `io` into a connection handle and the driver that reads from it.
    /// The writer task is spawned immediately.
    pub fn from_stream<S>(io: S, max_message_size: usize) -> (Self, ConnectionDriver<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let conn = Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ReadyState::Open as u8),
                close_fired: AtomicBool::new(false),
                outbound: tx,
                handlers: Mutex::new(Handlers::default()),
                stop_reading: Notify::new(),
                closed_tx,
            }),
        };
        let writer = tokio::spawn(write_loop(writer, rx));
        let driver = ConnectionDriver {
            conn: conn.clone(),
            reader,
            writer,
            max_message_size,
        };
        (conn, driver)
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn on_message(&self, handler: impl Fn(Bytes) + Send + Sync + 'static) {
        self.handlers().message.push(Arc::new(handler));
    }

    pub fn on_close(&self, handler: impl Fn(u16, &str) + Send + Sync + 'static) {
        self.handlers().close.push(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&WebSocketError) + Send + Sync + 'static) {
        self.handlers().error.push(Arc::new(handler));
    }

    /// Send a text message as one unmasked frame.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_frame(OpCode::Text, &data.into())
    }

    /// Send a binary message as one unmasked frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_frame(OpCode::Binary, &data.into())
    }

    /// Send a close frame and tear the connection down. Only the first call
    /// has an effect.
    pub fn close(&self, code: u16, reason: &str) {
        if self
            .shared
            .state
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        self.queue(encode_frame(true, OpCode::Close, &close_payload(code, reason), None));
        self.finish(code, reason);
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn send_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<(), WebSocketError> {
        if self.ready_state() != ReadyState::Open {
            return Err(WebSocketError::Closed);
        }
        self.shared
            .outbound
            .send(Outbound::Frame(encode_frame(true, opcode, payload, None)))
            .map_err(|_| WebSocketError::Closed)
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Handlers> {
        self.shared
            .handlers
            .lock()
            .expect("websocket handler mutex poisoned")
    }

    fn queue(&self, frame: Bytes) {
        let _ = self.shared.outbound.send(Outbound::Frame(frame));
    }

    /// Mark closed, stop both directions and run the close handlers once.
    fn finish(&self, code: u16, reason: &str) {
        self.shared
            .state
            .store(ReadyState::Closed as u8, Ordering::SeqCst);
        let _ = self.shared.outbound.send(Outbound::Shutdown);
        self.shared.stop_reading.notify_one();

        if self.shared.close_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let handlers = self.handlers().close.clone();
        for handler in handlers {
            handler(code, reason);
        }
        *self.handlers() = Handlers::default();
        self.shared.closed_tx.send_replace(true);
    }

    fn dispatch_message(&self, payload: Bytes) {
        let handlers = self.handlers().message.clone();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    fn dispatch_error(&self, error: &WebSocketError) {
        let handlers = self.handlers().error.clone();
        for handler in handlers {
            handler(error);
        }
    }

    /// Drain every complete frame from the decoder. Returns `false` once the
    /// connection is finished.
    fn process(&self, decoder: &mut FrameDecoder, assembler: &mut MessageAssembler) -> bool {
        loop {
            if self.ready_state() == ReadyState::Closed {
                return false;
            }
            let frame = match decoder.decode() {
                Ok(Some(frame)) => frame,
                Ok(None) => return true,
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            };

            match frame.opcode {
                OpCode::Close => {
                    let (code, reason) = parse_close_payload(&frame.payload);
                    tracing::debug!(code, reason = %reason, "WebSocket close frame received");
                    if self.ready_state() == ReadyState::Open {
                        self.queue(encode_frame(true, OpCode::Close, &close_payload(code, ""), None));
                    }
                    self.finish(code, &reason);
                    return false;
                }
                OpCode::Ping => {
                    self.queue(encode_frame(true, OpCode::Pong, &frame.payload, None));
                }
                OpCode::Pong => {}
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    match assembler.push(frame) {
                        Ok(Some(message)) => self.dispatch_message(message.payload),
                        Ok(None) => {}
                        Err(e) => {
                            self.fail(e);
                            return false;
                        }
                    }
                }
                OpCode::Reserved(op) => {
                    tracing::debug!(opcode = op, "Ignoring frame with reserved opcode");
                }
            }
        }
    }

    fn fail(&self, error: FrameError) {
        let code = error.close_code();
        let reason = error.to_string();
        tracing::debug!(code, error = %reason, "WebSocket protocol error");
        self.dispatch_error(&WebSocketError::Frame(error));
        self.close(code, &reason);
    }

    fn abort(&self) {
        self.finish(ABNORMAL_CLOSURE, "Connection closed");
    }
}

/// Reads and dispatches frames until the connection closes.
pub struct ConnectionDriver<S> {
    conn: WebSocketConnection,
    reader: ReadHalf<S>,
    writer: JoinHandle<()>,
    max_message_size: usize,
}

impl<S> ConnectionDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Run the read loop. `prebuffered` holds bytes that arrived together
    /// with the handshake and is decoded before the socket is read again.
    pub async fn run(self, prebuffered: Bytes) {
        let ConnectionDriver {
            conn,
            mut reader,
            writer,
            max_message_size,
        } = self;

        let mut decoder = FrameDecoder::new(max_message_size);
        let mut assembler = MessageAssembler::new(max_message_size);
        decoder.extend(&prebuffered);

        let mut buf = vec![0u8; READ_CHUNK];
        while conn.process(&mut decoder, &mut assembler) {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = conn.shared.stop_reading.notified() => break,
            };
            match read {
                Ok(0) => {
                    conn.abort();
                    break;
                }
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => {
                    conn.dispatch_error(&WebSocketError::Io(e));
                    conn.abort();
                    break;
                }
            }
        }

        drop(reader);
        if let Err(e) = writer.await {
            tracing::debug!(error = %e, "WebSocket writer task failed");
        }
    }
}

async fn write_loop<S>(mut writer: WriteHalf<S>, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::io::DuplexStream;

    const MAX: usize = 1024 * 1024;

    /// Client side of a duplex pipe speaking raw frames.
    struct Peer {
        io: DuplexStream,
        decoder: FrameDecoder,
    }

    impl Peer {
        async fn send(&mut self, opcode: OpCode, payload: &[u8]) {
            self.send_raw(&encode_frame(true, opcode, payload, Some([1, 2, 3, 4])))
                .await;
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.io.write_all(bytes).await.unwrap();
        }

        async fn recv(&mut self) -> Option<crate::http::websocket::frame::Frame> {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(frame) = self.decoder.decode().unwrap() {
                    return Some(frame);
                }
                let n = tokio::time::timeout(Duration::from_secs(2), self.io.read(&mut buf))
                    .await
                    .expect("timed out waiting for frame")
                    .unwrap();
                if n == 0 {
                    return None;
                }
                self.decoder.extend(&buf[..n]);
            }
        }
    }

    fn pair() -> (WebSocketConnection, ConnectionDriver<DuplexStream>, Peer) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let (conn, driver) = WebSocketConnection::from_stream(server, MAX);
        let peer = Peer {
            io: client,
            decoder: FrameDecoder::new(MAX),
        };
        (conn, driver, peer)
    }

    #[tokio::test]
    async fn echoes_messages() {
        let (conn, driver, mut peer) = pair();
        let echo = conn.clone();
        conn.on_message(move |data| {
            echo.send(data).unwrap();
        });
        tokio::spawn(driver.run(Bytes::new()));

        peer.send(OpCode::Text, b"hello").await;
        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"hello");
    }

    #[tokio::test]
    async fn ping_gets_pong_without_message() {
        let (conn, driver, mut peer) = pair();
        let messages = Arc::new(StdMutex::new(0));
        let counter = Arc::clone(&messages);
        conn.on_message(move |_| *counter.lock().unwrap() += 1);
        tokio::spawn(driver.run(Bytes::new()));

        peer.send(OpCode::Ping, b"are you there").await;
        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.opcode, OpCode::Pong);
        assert_eq!(&frame.payload[..], b"are you there");
        assert_eq!(*messages.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn close_frame_reports_code_and_reason() {
        let (conn, driver, mut peer) = pair();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        conn.on_close(move |code, reason| record.lock().unwrap().push((code, reason.to_owned())));
        let task = tokio::spawn(driver.run(Bytes::new()));

        peer.send(OpCode::Close, &close_payload(1001, "bye")).await;
        let echoed = peer.recv().await.unwrap();
        assert_eq!(echoed.opcode, OpCode::Close);
        assert_eq!(parse_close_payload(&echoed.payload).0, 1001);
        assert_eq!(peer.recv().await, None);

        task.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), [(1001, "bye".to_owned())]);
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert!(matches!(conn.send("late"), Err(WebSocketError::Closed)));
    }

    #[tokio::test]
    async fn eof_reports_abnormal_closure() {
        let (conn, driver, peer) = pair();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        conn.on_close(move |code, _| record.lock().unwrap().push(code));
        let task = tokio::spawn(driver.run(Bytes::new()));

        drop(peer);
        task.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), [ABNORMAL_CLOSURE]);
    }

    #[tokio::test]
    async fn local_close_is_idempotent() {
        let (conn, driver, mut peer) = pair();
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&calls);
        conn.on_close(move |code, _| record.lock().unwrap().push(code));
        let task = tokio::spawn(driver.run(Bytes::new()));

        conn.close(4000, "done");
        conn.close(4001, "again");
        conn.closed().await;

        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(parse_close_payload(&frame.payload), (4000, "done".to_owned()));
        assert_eq!(peer.recv().await, None);

        task.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), [4000]);
    }

    #[tokio::test]
    async fn prebuffered_bytes_are_decoded_first() {
        let (conn, driver, _peer) = pair();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        conn.on_message(move |data| record.lock().unwrap().push(data));

        let mut early = encode_frame(true, OpCode::Text, b"first", Some([9, 9, 9, 9])).to_vec();
        early.extend_from_slice(&encode_frame(true, OpCode::Binary, b"second", None));
        tokio::spawn(driver.run(Bytes::from(early)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(&seen[0][..], b"first");
        assert_eq!(&seen[1][..], b"second");
    }

    #[tokio::test]
    async fn fragmented_message_dispatched_once() {
        let (conn, driver, mut peer) = pair();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let echo = conn.clone();
        conn.on_message(move |data| {
            record.lock().unwrap().push(data.clone());
            echo.send(data).unwrap();
        });
        tokio::spawn(driver.run(Bytes::new()));

        peer.send_raw(&encode_frame(false, OpCode::Text, b"frag", None)).await;
        peer.send(OpCode::Ping, b"").await;
        peer.send_raw(&encode_frame(true, OpCode::Continuation, b"ment", None))
            .await;

        assert_eq!(peer.recv().await.unwrap().opcode, OpCode::Pong);
        let message = peer.recv().await.unwrap();
        assert_eq!(&message.payload[..], b"fragment");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_message_closes_with_1009() {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let (conn, driver) = WebSocketConnection::from_stream(server, 8);
        let mut peer = Peer {
            io: client,
            decoder: FrameDecoder::new(MAX),
        };
        let codes = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&codes);
        conn.on_close(move |code, _| record.lock().unwrap().push(code));
        tokio::spawn(driver.run(Bytes::new()));

        peer.send(OpCode::Binary, b"way more than eight bytes").await;
        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(parse_close_payload(&frame.payload).0, 1009);
        conn.closed().await;
        assert_eq!(*codes.lock().unwrap(), [1009]);
    }
}
