//! WebSocket opening handshake (server side).

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::http::response::ProxyError;

/// GUID appended to the client key (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// True if `value` contains `token` in its comma-separated list.
fn has_token(value: Option<&HeaderValue>, token: &str) -> bool {
    value
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// An HTTP/1.1 request asking for `Upgrade: websocket`.
pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
    request.version() == Version::HTTP_11
        && has_token(request.headers().get(header::UPGRADE), "websocket")
}

/// `base64(SHA-1(key + GUID))`
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validated handshake parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub accept: String,
    /// Subprotocol echoed back to the client, if it offered any.
    pub protocol: Option<String>,
}

pub fn validate(headers: &HeaderMap) -> Result<Handshake, ProxyError> {
    if !has_token(headers.get(header::UPGRADE), "websocket") {
        return Err(ProxyError::Handshake("missing Upgrade: websocket"));
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.trim().is_empty())
        .ok_or(ProxyError::Handshake("missing Sec-WebSocket-Key"))?;

    let protocol = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|p| !p.is_empty()))
        .map(str::to_owned);

    Ok(Handshake {
        accept: compute_accept(key),
        protocol,
    })
}

/// The `101 Switching Protocols` reply for a validated handshake.
pub fn switching_protocols(handshake: &Handshake) -> Result<Response<Body>, ProxyError> {
    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, &handshake.accept);
    if let Some(protocol) = &handshake.protocol {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    builder
        .body(Body::empty())
        .map_err(|_| ProxyError::Handshake("invalid subprotocol"))
}
