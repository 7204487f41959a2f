//! Shared load balancer exposed as a plugin.
//!
//! Route functions written in code can pick targets through the server's
//! shared balancer (`ProxyServerBuilder::balancer`) instead of creating
//! their own. Config sites always own a private balancer.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::load_balancer::LoadBalancer;
use crate::plugins::{Plugin, PluginError, ProxyContext, SetupHook};

#[derive(Debug)]
pub struct BalancerPlugin {
    balancer: Arc<LoadBalancer>,
}

impl BalancerPlugin {
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self { balancer }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }
}

impl Plugin for BalancerPlugin {
    fn name(&self) -> &str {
        "load-balancer"
    }

    fn setup_hook(&self) -> Option<&dyn SetupHook> {
        Some(self)
    }
}

impl SetupHook for BalancerPlugin {
    fn setup<'a>(&'a self, _ctx: &'a ProxyContext) -> BoxFuture<'a, Result<(), PluginError>> {
        tracing::debug!(
            strategy = ?self.balancer.kind(),
            targets = self.balancer.health_status().len(),
            "Shared load balancer ready"
        );
        future::ready(Ok(())).boxed()
    }
}
