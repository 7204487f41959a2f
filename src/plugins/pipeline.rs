//! Ordered plugin execution.

use std::sync::Arc;

use axum::response::Response;

use crate::http::request::RequestContext;
use crate::load_balancer::LoadBalancer;
use crate::plugins::{
    BalancerPlugin, LoggerPlugin, MetricsPlugin, Plugin, PluginError, ProxyContext,
};

/// Result of running the request hooks.
pub enum PipelineOutcome {
    /// No plugin answered; route and forward the request.
    Continue,
    /// `plugin` answered; send `response` as is.
    Respond { plugin: String, response: Response },
}

impl std::fmt::Debug for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOutcome::Continue => f.write_str("Continue"),
            PipelineOutcome::Respond { plugin, response } => f
                .debug_struct("Respond")
                .field("plugin", plugin)
                .field("status", &response.status())
                .finish(),
        }
    }
}

/// A setup hook failed; startup must not continue.
#[derive(Debug, thiserror::Error)]
#[error("plugin `{plugin}` failed to set up: {source}")]
pub struct SetupError {
    pub plugin: String,
    #[source]
    pub source: PluginError,
}

#[derive(Clone)]
pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Pipeline {
    /// Baseline plugins (logger, metrics, balancer) followed by `plugins` in
    /// registration order.
    pub fn new(balancer: Arc<LoadBalancer>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut all: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(LoggerPlugin::new()),
            Arc::new(MetricsPlugin::new()),
            Arc::new(BalancerPlugin::new(balancer)),
        ];
        all.extend(plugins);
        Self { plugins: all }
    }

    /// A pipeline of exactly `plugins`, without the baseline.
    pub fn from_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every setup hook in order, stopping at the first failure.
    pub async fn setup(&self, ctx: &ProxyContext) -> Result<(), SetupError> {
        for plugin in &self.plugins {
            let Some(hook) = plugin.setup_hook() else {
                continue;
            };
            hook.setup(ctx).await.map_err(|source| SetupError {
                plugin: plugin.name().to_owned(),
                source,
            })?;
            tracing::debug!(plugin = plugin.name(), "Plugin setup complete");
        }
        Ok(())
    }

    /// Run request hooks in order until one responds.
    pub async fn run(&self, ctx: &mut RequestContext) -> PipelineOutcome {
        for plugin in &self.plugins {
            let Some(hook) = plugin.request_hook() else {
                continue;
            };
            if let Some(response) = hook.on_request(ctx).await {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    plugin = plugin.name(),
                    status = response.status().as_u16(),
                    "Plugin answered request"
                );
                return PipelineOutcome::Respond {
                    plugin: plugin.name().to_owned(),
                    response,
                };
            }
        }
        PipelineOutcome::Continue
    }
}
