//! HTTP forwarding engine.
//!
//! # Responsibilities
//! - Rewrite the request for the routed target (scheme, authority, `Host`)
//! - Stream the request body upstream and the response body back
//! - Map connection failures to `502 Bad Gateway`
//!
//! # Design Decisions
//! - Bodies are never buffered; `Body::new` wraps hyper's `Incoming`
//! - Response status and headers are copied verbatim; staged headers only
//!   fill in names the upstream did not send
//! - No retries: a failed forward is final for that request

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::{BoxFuture, FutureExt};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use url::Url;

use crate::config::validation::validate_target;
use crate::http::middleware::Endpoint;
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::http::response::ProxyError;
use crate::observability::metrics;

/// Pooled upstream client speaking plain HTTP and HTTPS.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the upstream client shared by forwarding and health probes.
pub fn build_client(connect_timeout: Duration, tls: Arc<ClientConfig>) -> HttpClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(connect_timeout));
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_tls_config((*tls).clone())
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new()).build(https)
}

/// Parse a target returned by a route function.
pub fn parse_target(target: &str) -> Result<Url, ProxyError> {
    validate_target(target).map_err(|reason| ProxyError::InvalidTarget {
        target: target.to_owned(),
        reason,
    })
}

/// `ws` and `wss` are aliases of `http` and `https`.
pub(crate) fn http_scheme(url: &Url) -> &'static str {
    match url.scheme() {
        "https" | "wss" => "https",
        _ => "http",
    }
}

/// `host[:port]` with the port only when the URL names one explicitly.
pub(crate) fn target_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// Port to dial, defaulting to 80 / 443 by scheme.
pub(crate) fn target_port(url: &Url) -> u16 {
    url.port().unwrap_or(match http_scheme(url) {
        "https" => 443,
        _ => 80,
    })
}

/// Absolute upstream URI: the target's scheme and authority with the
/// request's own path and query.
pub(crate) fn upstream_uri(target: &Url, path_and_query: &str) -> Result<Uri, ProxyError> {
    let authority = target_authority(target);
    format!("{}://{}{}", http_scheme(target), authority, path_and_query)
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| ProxyError::InvalidTarget {
            target: target.to_string(),
            reason: e.to_string(),
        })
}

/// Forwards requests to upstream targets.
#[derive(Clone)]
pub struct Forwarder {
    client: HttpClient,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, tls: Arc<ClientConfig>) -> Self {
        Self {
            client: build_client(connect_timeout, tls),
        }
    }

    pub fn from_client(client: HttpClient) -> Self {
        Self { client }
    }

    /// Send the request to `target` and return the upstream response with
    /// its body still streaming.
    pub async fn forward(&self, mut ctx: RequestContext, target: &Url) -> Result<Response, ProxyError> {
        let uri = upstream_uri(target, &ctx.path_and_query())?;
        let authority = target_authority(target);
        let host = HeaderValue::from_str(&authority)
            .map_err(|_| ProxyError::InvalidTarget {
                target: target.to_string(),
                reason: "authority is not a valid header value".to_owned(),
            })?;

        let mut headers = std::mem::take(&mut ctx.headers);
        headers.insert(header::HOST, host);
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(X_REQUEST_ID, value);
        }

        let mut request = Request::new(ctx.take_body());
        *request.method_mut() = ctx.method.clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;

        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            target = %authority,
            path = %ctx.path(),
            "Forwarding request"
        );

        let response = self.client.request(request).await.map_err(|e| {
            tracing::warn!(
                request_id = %ctx.request_id,
                target = %authority,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_upstream_error("http");
            ProxyError::UpstreamUnreachable(e.to_string())
        })?;

        let (mut parts, body) = response.into_parts();
        ctx.apply_staged_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Innermost middleware step: forward to one routed target.
pub struct ForwardTo<'a> {
    forwarder: &'a Forwarder,
    target: Url,
}

impl<'a> ForwardTo<'a> {
    pub fn new(forwarder: &'a Forwarder, target: Url) -> Self {
        Self { forwarder, target }
    }
}

impl Endpoint for ForwardTo<'_> {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'_, Response> {
        async move {
            match self.forwarder.forward(ctx, &self.target).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
        .boxed()
    }
}
