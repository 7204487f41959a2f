//! Baseline request logger.

use axum::response::Response;
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::http::request::RequestContext;
use crate::plugins::{Plugin, PluginError, ProxyContext, RequestHook, SetupHook};

/// Logs every request as it enters the pipeline.
#[derive(Debug, Default)]
pub struct LoggerPlugin;

impl LoggerPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for LoggerPlugin {
    fn name(&self) -> &str {
        "logger"
    }

    fn setup_hook(&self) -> Option<&dyn SetupHook> {
        Some(self)
    }

    fn request_hook(&self) -> Option<&dyn RequestHook> {
        Some(self)
    }
}

impl SetupHook for LoggerPlugin {
    fn setup<'a>(&'a self, ctx: &'a ProxyContext) -> BoxFuture<'a, Result<(), PluginError>> {
        tracing::info!(
            sites = ctx.registry.len(),
            plugins = %ctx.plugins.join(", "),
            "Plugin pipeline ready"
        );
        future::ready(Ok(())).boxed()
    }
}

impl RequestHook for LoggerPlugin {
    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Option<Response>> {
        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            host = ctx.url.host_str().unwrap_or_default(),
            path = %ctx.path_and_query(),
            client = ctx.client_ip().as_deref().unwrap_or("-"),
            "Request received"
        );
        future::ready(None).boxed()
    }
}
