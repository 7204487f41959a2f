//! Baseline request counter.

use axum::response::Response;
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::http::request::RequestContext;
use crate::observability::metrics;
use crate::plugins::{Plugin, RequestHook};

/// Counts requests by method as they enter the pipeline. Completion
/// metrics are recorded by the server once the response is known.
#[derive(Debug, Default)]
pub struct MetricsPlugin;

impl MetricsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for MetricsPlugin {
    fn name(&self) -> &str {
        "metrics"
    }

    fn request_hook(&self) -> Option<&dyn RequestHook> {
        Some(self)
    }
}

impl RequestHook for MetricsPlugin {
    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Option<Response>> {
        metrics::record_request_received(ctx.method.as_str());
        future::ready(None).boxed()
    }
}
