//! Security response headers.
//!
//! # Responsibilities
//! - Stage standard hardening headers on every response of a site
//! - Add HSTS only when the request reached us over HTTPS
//!
//! # Design Decisions
//! - Headers are staged on the context, so an upstream that sets its own
//!   value keeps it

use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::future::{BoxFuture, FutureExt};

use crate::http::middleware::{Middleware, Next};
use crate::http::request::RequestContext;

const HSTS: &str = "max-age=31536000; includeSubDomains";

#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            headers: vec![
                (
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ),
                (
                    HeaderName::from_static("x-frame-options"),
                    HeaderValue::from_static("DENY"),
                ),
                (
                    HeaderName::from_static("x-xss-protection"),
                    HeaderValue::from_static("1; mode=block"),
                ),
                (
                    HeaderName::from_static("referrer-policy"),
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
            ],
        }
    }
}

impl SecurityHeaders {
    /// Add or replace one header in the set.
    pub fn with(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value));
        self
    }
}

impl Middleware for SecurityHeaders {
    fn handle<'a>(&'a self, mut ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response> {
        for (name, value) in &self.headers {
            ctx.response_headers.insert(name.clone(), value.clone());
        }
        if ctx.header("x-forwarded-proto") == Some("https") {
            ctx.response_headers.insert(
                HeaderName::from_static("strict-transport-security"),
                HeaderValue::from_static(HSTS),
            );
        }
        next.run(ctx).boxed()
    }
}
