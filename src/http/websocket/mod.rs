//! WebSocket handling.
//!
//! # Responsibilities
//! - Detect upgrade requests and run the opening handshake
//! - Terminate connections locally and drive a user handler (terminate mode)
//! - Relay the handshake and then raw bytes to an upstream (proxy mode)
//!
//! # Data Flow
//! ```text
//! Terminate:  Client ──frames──▶ FrameDecoder ─▶ WebSocketConnection ─▶ handler
//! Proxy:      Client ◀──── raw bytes ────▶ Proxy ◀──── raw bytes ────▶ Upstream
//! ```
//!
//! # Design Decisions
//! - Upgrades are HTTP/1.1 only; the plugin pipeline does not run on them
//! - Bytes that arrived together with the handshake are never lost:
//!   `Upgraded` replays them before the socket is read again
//! - A terminate handler runs concurrently with the frame reader
//! - Proxy mode is byte-level; frames are not inspected

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod proxy;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::response::Response;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::request::RequestContext;
use crate::http::response::ProxyError;
use crate::observability::metrics;

pub use connection::{ReadyState, WebSocketConnection, WebSocketError};
pub use handshake::is_upgrade_request;
pub use proxy::proxy_upgrade;

/// Called once per terminated connection. Callbacks registered before the
/// returned future first awaits see every frame; the future may run for the
/// whole session (for example until `closed()` resolves).
pub type WebSocketHandler =
    Arc<dyn Fn(WebSocketConnection, RequestContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// How a site treats WebSocket upgrades.
#[derive(Clone)]
pub enum WebSocketMode {
    /// Complete the handshake here and hand the connection to a handler.
    Terminate(WebSocketHandler),
    /// Relay the upgrade to the routed target.
    Proxy(WebSocketProxyConfig),
}

impl Default for WebSocketMode {
    fn default() -> Self {
        WebSocketMode::Proxy(WebSocketProxyConfig::default())
    }
}

impl fmt::Debug for WebSocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSocketMode::Terminate(_) => f.write_str("Terminate(..)"),
            WebSocketMode::Proxy(config) => f.debug_tuple("Proxy").field(config).finish(),
        }
    }
}

/// Extra handshake parameters sent to the upstream in proxy mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketProxyConfig {
    /// Offered through `Sec-WebSocket-Protocol` when the client offered none.
    pub subprotocols: Vec<String>,
    /// Added to the upstream handshake request.
    pub headers: Vec<(String, String)>,
}

/// Server-wide WebSocket settings.
#[derive(Clone)]
pub struct WebSocketSettings {
    pub max_message_size: usize,
    pub connect_timeout: Duration,
    /// TLS configuration for `wss` upstreams.
    pub tls: Arc<rustls::ClientConfig>,
}

/// Byte stream left over after an upgrade.
pub trait RawIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawIo for T {}

/// The upgraded connection as a tokio byte stream. `Upgraded` replays any
/// bytes hyper read past the handshake before reading the socket again, so
/// nothing is prebuffered on this side.
pub(crate) fn upgraded_io(upgraded: Upgraded) -> Box<dyn RawIo> {
    Box::new(TokioIo::new(upgraded))
}

/// Accept the upgrade locally. Returns the `101` response; the connection
/// itself runs on a spawned task once hyper hands over the socket.
pub fn terminate(
    on_upgrade: OnUpgrade,
    ctx: RequestContext,
    handler: WebSocketHandler,
    settings: &WebSocketSettings,
) -> Result<Response, ProxyError> {
    let accepted = handshake::validate(&ctx.headers)?;
    let response = handshake::switching_protocols(&accepted)?;
    let max_message_size = settings.max_message_size;

    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::debug!(request_id = %ctx.request_id, error = %e, "Client upgrade failed");
                return;
            }
        };
        let io = upgraded_io(upgraded);
        let request_id = ctx.request_id.clone();

        tracing::debug!(request_id = %request_id, path = %ctx.path(), "WebSocket connection opened");
        metrics::record_websocket_opened("terminate");

        let (conn, driver) = WebSocketConnection::from_stream(io, max_message_size);
        // The handler is polled first, so callbacks it registers before
        // its first await see every frame. Frames keep flowing while it runs.
        tokio::join!(handler(conn, ctx), driver.run(Bytes::new()));

        metrics::record_websocket_closed("terminate");
        tracing::debug!(request_id = %request_id, "WebSocket connection closed");
    });

    Ok(response)
}
