//! Proxied WebSocket upgrades.
//!
//! The client's handshake is replayed against the routed target. Only a
//! `101` from the upstream is passed on; after that both sockets are joined
//! and bytes flow untouched until either side closes.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::http::forward::{http_scheme, target_authority, target_port};
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::http::response::ProxyError;
use crate::http::websocket::{upgraded_io, RawIo, WebSocketProxyConfig, WebSocketSettings};
use crate::net::tls::websocket_client_config;
use crate::observability::metrics;
use crate::resilience::timeouts::{connect, with_timeout};

/// Headers of the upstream `101` relayed to the client.
const RELAYED_HEADERS: [HeaderName; 5] = [
    header::UPGRADE,
    header::CONNECTION,
    header::SEC_WEBSOCKET_ACCEPT,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Relay the upgrade to `target`. On success the returned `101` goes to the
/// client and a task joins the two sockets once both upgrades complete.
pub async fn proxy_upgrade(
    on_upgrade: OnUpgrade,
    ctx: RequestContext,
    target: Url,
    config: &WebSocketProxyConfig,
    settings: &WebSocketSettings,
) -> Result<Response<Body>, ProxyError> {
    let request = upstream_request(&ctx, &target, config)?;
    let io = open(&target, settings).await.map_err(|e| {
        tracing::warn!(
            request_id = %ctx.request_id,
            target = %target,
            error = %e,
            "WebSocket upstream connection failed"
        );
        metrics::record_upstream_error("websocket");
        ProxyError::UpgradeFailed(e.to_string())
    })?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "WebSocket upstream connection error");
        }
    });

    let mut upstream = tokio::time::timeout(settings.connect_timeout, sender.send_request(request))
        .await
        .map_err(|_| ProxyError::UpgradeFailed("upstream handshake timed out".to_owned()))?
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;

    if upstream.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::warn!(
            request_id = %ctx.request_id,
            target = %target,
            status = %upstream.status(),
            "Upstream rejected WebSocket upgrade"
        );
        return Err(ProxyError::UpgradeRejected(upstream.status()));
    }

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .body(Body::empty())
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;
    for name in RELAYED_HEADERS {
        for value in upstream.headers().get_all(&name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }

    let upstream_upgrade = hyper::upgrade::on(&mut upstream);
    let request_id = ctx.request_id.clone();
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(on_upgrade, upstream_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(request_id = %request_id, error = %e, "WebSocket upgrade aborted");
                return;
            }
        };
        let client = upgraded_io(client);
        let upstream = upgraded_io(upstream);

        metrics::record_websocket_opened("proxy");
        tracing::debug!(request_id = %request_id, target = %target, "WebSocket proxy established");
        if let Err(e) = pipe(client, upstream, Bytes::new()).await {
            tracing::debug!(request_id = %request_id, error = %e, "WebSocket proxy ended with error");
        }
        metrics::record_websocket_closed("proxy");
        tracing::debug!(request_id = %request_id, "WebSocket proxy closed");
    });

    Ok(response)
}

/// The handshake request sent upstream: the client's headers, `Host` set to the
/// target, upgrade headers forced and configured extras added.
fn upstream_request(
    ctx: &RequestContext,
    target: &Url,
    config: &WebSocketProxyConfig,
) -> Result<Request<Empty<Bytes>>, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_owned(),
    };

    let mut headers: HeaderMap = ctx.headers.clone();
    let host = HeaderValue::from_str(&target_authority(target))
        .map_err(|_| invalid("authority is not a valid header value"))?;
    headers.insert(header::HOST, host);
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if !headers.contains_key(header::SEC_WEBSOCKET_PROTOCOL) && !config.subprotocols.is_empty() {
        let offered = HeaderValue::from_str(&config.subprotocols.join(", "))
            .map_err(|_| invalid("subprotocol is not a valid header value"))?;
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
    }
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| invalid("configured header name is invalid"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| invalid("configured header value is invalid"))?;
        headers.insert(name, value);
    }

    let mut request = Request::new(Empty::<Bytes>::new());
    *request.uri_mut() = ctx
        .path_and_query()
        .parse()
        .map_err(|_| ProxyError::BadRequest("invalid request target"))?;
    *request.headers_mut() = headers;
    Ok(request)
}

/// Dial the target, wrapping the socket in TLS for `wss`/`https`.
async fn open(target: &Url, settings: &WebSocketSettings) -> std::io::Result<Box<dyn RawIo>> {
    let host = target.host_str().unwrap_or_default().to_owned();
    let stream = connect(&host, target_port(target), settings.connect_timeout).await?;
    if http_scheme(target) != "https" {
        return Ok(Box::new(stream));
    }

    let server_name = ServerName::try_from(host)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let connector = TlsConnector::from(websocket_client_config(&settings.tls));
    let tls = with_timeout(
        settings.connect_timeout,
        "tls handshake",
        connector.connect(server_name, stream),
    )
    .await?;
    Ok(Box::new(tls))
}

/// Join two upgraded sockets. Bytes the client sent along with its
/// handshake are written upstream first. Returns when either direction
/// ends; both sockets are closed on return.
pub async fn pipe(
    client: Box<dyn RawIo>,
    upstream: Box<dyn RawIo>,
    prebuffered: Bytes,
) -> std::io::Result<()> {
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut upstream_rx, mut upstream_tx) = tokio::io::split(upstream);

    if !prebuffered.is_empty() {
        upstream_tx.write_all(&prebuffered).await?;
    }

    let result = tokio::select! {
        r = relay(&mut client_rx, &mut upstream_tx) => r,
        r = relay(&mut upstream_rx, &mut client_tx) => r,
    };

    let _ = client_tx.shutdown().await;
    let _ = upstream_tx.shutdown().await;
    result
}

async fn relay(
    from: &mut ReadHalf<Box<dyn RawIo>>,
    to: &mut WriteHalf<Box<dyn RawIo>>,
) -> std::io::Result<()> {
    tokio::io::copy(from, to).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use tokio::io::AsyncReadExt;

    fn ctx(headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut builder = HttpRequest::builder().uri("/socket?token=abc");
        builder = builder.header("Host", "chat.example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::from_request(builder.body(Body::empty()).unwrap(), None).unwrap()
    }

    #[test]
    fn upstream_request_rewrites_host_and_adds_extras() {
        let ctx = ctx(&[("upgrade", "websocket"), ("sec-websocket-key", "abc")]);
        let config = WebSocketProxyConfig {
            subprotocols: vec!["graphql-ws".into(), "chat".into()],
            headers: vec![("x-api-key".into(), "secret".into())],
        };
        let target = Url::parse("ws://10.0.0.5:9000").unwrap();
        let request = upstream_request(&ctx, &target, &config).unwrap();

        assert_eq!(request.uri(), "/socket?token=abc");
        let headers = request.headers();
        assert_eq!(headers[header::HOST], "10.0.0.5:9000");
        assert_eq!(headers[header::CONNECTION], "Upgrade");
        assert_eq!(headers[header::SEC_WEBSOCKET_KEY], "abc");
        assert_eq!(headers[header::SEC_WEBSOCKET_PROTOCOL], "graphql-ws, chat");
        assert_eq!(headers["x-api-key"], "secret");
    }

    #[test]
    fn client_subprotocol_wins_over_configured() {
        let ctx = ctx(&[("sec-websocket-protocol", "mqtt")]);
        let config = WebSocketProxyConfig {
            subprotocols: vec!["chat".into()],
            headers: Vec::new(),
        };
        let target = Url::parse("wss://upstream.internal").unwrap();
        let request = upstream_request(&ctx, &target, &config).unwrap();
        assert_eq!(request.headers()[header::SEC_WEBSOCKET_PROTOCOL], "mqtt");
        assert_eq!(request.headers()[header::HOST], "upstream.internal");
    }

    #[tokio::test]
    async fn pipe_flushes_prebuffer_and_tears_down_both_sides() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);
        let task = tokio::spawn(pipe(
            Box::new(client),
            Box::new(upstream),
            Bytes::from_static(b"early"),
        ));

        let mut buf = [0u8; 5];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        upstream_peer.write_all(b"down").await.unwrap();
        let mut buf = [0u8; 4];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"down");

        drop(client_peer);
        task.await.unwrap().unwrap();
        let mut rest = Vec::new();
        upstream_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
