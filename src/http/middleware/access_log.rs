//! Access log middleware.
//!
//! Emits one completion event per request with the final status and the
//! time spent since the request entered the gateway.

use axum::response::Response;
use futures_util::future::{BoxFuture, FutureExt};

use crate::http::middleware::{Middleware, Next};
use crate::http::request::RequestContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl AccessLog {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for AccessLog {
    fn handle<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response> {
        async move {
            let request_id = ctx.request_id.clone();
            let method = ctx.method.clone();
            let path = ctx.path_and_query();
            let host = ctx.url.host_str().unwrap_or_default().to_owned();
            let client = ctx.client_ip();
            let start = ctx.start_time;

            let response = next.run(ctx).await;

            tracing::info!(
                request_id = %request_id,
                method = %method,
                host = %host,
                path = %path,
                client = client.as_deref().unwrap_or("-"),
                status = response.status().as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
            response
        }
        .boxed()
    }
}
