//! Health endpoint plugin.
//!
//! Answers requests for one path on every site with a JSON status document,
//! before any routing happens.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response, Json};
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::Serialize;

use crate::http::request::RequestContext;
use crate::plugins::{Plugin, RequestHook};

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    /// Milliseconds since the Unix epoch.
    timestamp: u64,
    uptime_secs: f64,
    version: &'static str,
}

#[derive(Debug)]
pub struct HealthCheckPlugin {
    path: String,
    started: Instant,
}

impl HealthCheckPlugin {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn status(&self) -> HealthStatus {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        HealthStatus {
            status: "healthy",
            timestamp,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl Default for HealthCheckPlugin {
    fn default() -> Self {
        Self::new("/health")
    }
}

impl Plugin for HealthCheckPlugin {
    fn name(&self) -> &str {
        "health-check"
    }

    fn request_hook(&self) -> Option<&dyn RequestHook> {
        Some(self)
    }
}

impl RequestHook for HealthCheckPlugin {
    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Option<Response>> {
        let response = (ctx.path() == self.path)
            .then(|| (StatusCode::OK, Json(self.status())).into_response());
        future::ready(response).boxed()
    }
}
