//! Rate limiting middleware.
//!
//! One token bucket per client IP. A request spends one token; buckets
//! refill continuously at `requests_per_second` up to `burst_size`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;

use crate::config::RateLimitConfig;
use crate::http::middleware::{Middleware, Next};
use crate::http::request::RequestContext;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take one token, or report how many seconds until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> Result<(), u64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(((1.0 - self.tokens) / refill_rate).ceil().max(1.0) as u64)
        }
    }
}

#[derive(Debug)]
pub struct RateLimit {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rps: f64,
    burst: f64,
}

impl RateLimit {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: f64::from(requests_per_second.max(1)),
            burst: f64::from(burst_size.max(1)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    fn check(&self, key: &str) -> Result<(), u64> {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        buckets
            .entry(key.to_owned())
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rps)
    }
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = Json(json!({
        "error": "Too Many Requests",
        "retryAfter": retry_after,
    }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

impl Middleware for RateLimit {
    fn handle<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response> {
        let key = ctx.client_ip().unwrap_or_else(|| "unknown".to_owned());
        match self.check(&key) {
            Ok(()) => next.run(ctx).boxed(),
            Err(retry_after) => {
                let site = ctx.url.host_str().unwrap_or_default().to_owned();
                tracing::warn!(client = %key, site = %site, retry_after, "Rate limit exceeded");
                metrics::record_rate_limited(&site);
                let mut response = too_many_requests(retry_after);
                ctx.apply_staged_headers(response.headers_mut());
                futures_util::future::ready(response).boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;

    use crate::http::middleware::Endpoint;

    struct Ok200;

    impl Endpoint for Ok200 {
        fn call(&self, _ctx: RequestContext) -> BoxFuture<'_, Response> {
            futures_util::future::ready(Response::new(Body::empty())).boxed()
        }
    }

    fn ctx(ip: &str) -> RequestContext {
        let req = Request::builder()
            .uri("/")
            .header("Host", "example.com")
            .body(Body::empty())
            .unwrap();
        RequestContext::from_request(req, Some(format!("{ip}:1234").parse().unwrap())).unwrap()
    }

    #[test]
    fn bucket_allows_burst_then_rejects() {
        let limiter = RateLimit::new(1, 3);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").is_ok());
        }
        assert_eq!(limiter.check("10.0.0.1"), Err(1));
        // Other clients have their own bucket.
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[tokio::test]
    async fn rejected_request_gets_429_json() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RateLimit::new(1, 1))];

        let first = Next::new(&chain, &Ok200).run(ctx("10.0.0.1")).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = Next::new(&chain, &Ok200).run(ctx("10.0.0.1")).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "1");

        let body = second.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Too Many Requests");
        assert_eq!(json["retryAfter"], 1);
    }
}
