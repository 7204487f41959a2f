//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4) as early as possible
//! - Extract routing-relevant information (host, path)
//! - Build the per-request [`RequestContext`] handed to plugins, middleware
//!   and the forwarding engine
//!
//! # Design Decisions
//! - The context owns the request body; only the forwarding engine takes it
//! - Header names are lower-case by construction (`http::HeaderMap`)
//! - Response headers staged by hooks never override upstream headers

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;
use uuid::Uuid;

use crate::http::response::ProxyError;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request IDs for `tower-http`'s request-id layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let value = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(value))
    }
}

/// Host the request is addressed to: the `Host` header, or the URI
/// authority for HTTP/2 requests that carry `:authority` instead.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_owned()))
}

/// Per-request state passed through the plugin pipeline, the site's route
/// function, its middleware chain and finally the forwarding engine.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub version: Version,
    /// Absolute URL rebuilt from the host and the request target.
    pub url: Url,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,
    pub start_time: Instant,
    /// Headers hooks want on the final response.
    pub response_headers: HeaderMap,
    /// `Body` is not `Sync`; the lock keeps `&RequestContext` shareable
    /// across awaits. Only reached through `&mut self`, so never contended.
    body: Mutex<Option<Body>>,
}

impl RequestContext {
    /// Build a context from an inbound request.
    pub fn from_request(
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Self, ProxyError> {
        let host = request_host(&request).unwrap_or_else(|| "localhost".to_owned());
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("http://{host}{target}"))
            .map_err(|_| ProxyError::BadRequest("invalid request target"))?;

        let (parts, body) = request.into_parts();
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            request_id,
            method: parts.method,
            version: parts.version,
            url,
            headers: parts.headers,
            client_addr,
            start_time: Instant::now(),
            response_headers: HeaderMap::new(),
            body: Mutex::new(Some(body)),
        })
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Path plus query string, as sent on the request line.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_owned(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Identifier for sticky sessions: the client IP address.
    pub fn client_id(&self) -> Option<String> {
        self.client_addr.map(|addr| addr.ip().to_string())
    }

    /// Client IP as seen through `x-forwarded-for`, falling back to the peer.
    pub fn client_ip(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .or_else(|| self.client_id())
    }

    /// Take the request body; later calls get an empty body.
    pub fn take_body(&mut self) -> Body {
        self.body
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_else(Body::empty)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Copy staged response headers into `headers`, skipping names the
    /// response already carries.
    pub fn apply_staged_headers(&self, headers: &mut HeaderMap) {
        for name in self.response_headers.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in self.response_headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, host: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header("Host", host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn builds_url_from_host_and_target() {
        let ctx = RequestContext::from_request(request("/api/v1?x=1", Some("a.example.com")), None)
            .unwrap();
        assert_eq!(ctx.url.as_str(), "http://a.example.com/api/v1?x=1");
        assert_eq!(ctx.path(), "/api/v1");
        assert_eq!(ctx.path_and_query(), "/api/v1?x=1");
    }

    #[test]
    fn keeps_existing_request_id() {
        let mut req = request("/", Some("example.com"));
        req.headers_mut()
            .insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let ctx = RequestContext::from_request(req, None).unwrap();
        assert_eq!(ctx.request_id, "abc-123");
    }

    #[test]
    fn host_falls_back_to_uri_authority() {
        let req = request("http://h2.example.com/x", None);
        assert_eq!(request_host(&req).as_deref(), Some("h2.example.com"));
        assert_eq!(request_host(&request("/x", None)), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut req = request("/", Some("example.com"));
        req.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let ctx = RequestContext::from_request(req, Some(addr)).unwrap();
        assert_eq!(ctx.client_ip().as_deref(), Some("203.0.113.9"));
        assert_eq!(ctx.client_id().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn staged_headers_do_not_override() {
        let mut ctx =
            RequestContext::from_request(request("/", Some("example.com")), None).unwrap();
        ctx.response_headers
            .insert("x-frame-options", HeaderValue::from_static("DENY"));
        ctx.response_headers
            .insert("content-type", HeaderValue::from_static("text/plain"));

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        ctx.apply_staged_headers(&mut headers);

        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-frame-options"], "DENY");
    }

    #[test]
    fn take_body_only_once() {
        let mut ctx =
            RequestContext::from_request(request("/", Some("example.com")), None).unwrap();
        let _ = ctx.take_body();
        assert!(ctx.body.get_mut().unwrap().is_none());
        let _ = ctx.take_body();
    }

    #[test]
    fn context_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RequestContext>();
    }
}
