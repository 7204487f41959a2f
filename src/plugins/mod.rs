//! Plugin subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Pipeline::setup → SetupHook::setup for each plugin, in order
//!     → any error aborts startup
//!
//! Per request:
//!     Pipeline::run → RequestHook::on_request for each plugin, in order
//!     → Some(response): short-circuit, nothing else runs
//!     → None for every plugin: continue to routing
//! ```
//!
//! # Design Decisions
//! - Capabilities are declared through optional hook accessors
//! - Baseline plugins (logger, metrics, balancer) always run first
//! - Plugin state lives in the plugin instance, owned by one server

pub mod balancer;
pub mod health;
pub mod logger;
pub mod metrics;
pub mod pipeline;

use std::sync::Arc;

use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::ProxyConfig;
use crate::http::request::RequestContext;
use crate::routing::SiteRegistry;

pub use balancer::BalancerPlugin;
pub use health::HealthCheckPlugin;
pub use logger::LoggerPlugin;
pub use metrics::MetricsPlugin;
pub use pipeline::{Pipeline, PipelineOutcome, SetupError};

/// A named extension with optional setup and request hooks.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn setup_hook(&self) -> Option<&dyn SetupHook> {
        None
    }

    fn request_hook(&self) -> Option<&dyn RequestHook> {
        None
    }
}

/// Runs once before the listener binds.
pub trait SetupHook: Send + Sync {
    fn setup<'a>(&'a self, ctx: &'a ProxyContext) -> BoxFuture<'a, Result<(), PluginError>>;
}

/// Runs once per request. Returning a response ends the request there.
pub trait RequestHook: Send + Sync {
    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Option<Response>>;
}

/// What setup hooks can see of the server being started.
#[derive(Clone)]
pub struct ProxyContext {
    pub config: Arc<ProxyConfig>,
    pub registry: SiteRegistry,
    /// Names of all plugins in pipeline order.
    pub plugins: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{0}")]
    Setup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn setup(message: impl Into<String>) -> Self {
        PluginError::Setup(message.into())
    }
}
