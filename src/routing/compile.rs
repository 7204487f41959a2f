//! Builds sites from configuration.
//!
//! Every configured site gets its own balancer seeded with its targets and
//! weights, a middleware chain built from `[sites.middleware]` and a proxy
//! WebSocket mode carrying `[sites.websocket]`.

use std::sync::Arc;

use crate::config::schema::SiteConfig;
use crate::http::middleware::AccessLog;
use crate::http::websocket::WebSocketProxyConfig;
use crate::load_balancer::LoadBalancer;
use crate::routing::site::Site;
use crate::security::{RateLimit, SecurityHeaders};

/// Compile one site. Middleware order: access log (outermost), rate
/// limit, security headers.
pub fn compile_site(config: &SiteConfig) -> Site {
    let balancer = Arc::new(LoadBalancer::new(config.strategy));
    for target in &config.targets {
        balancer.add_target(target);
    }
    for (target, weight) in &config.weights {
        balancer.set_weight(target, *weight);
    }

    let mut site = Site::new(config.domain.clone()).balanced(config.targets.clone(), balancer);

    let middleware = &config.middleware;
    if middleware.access_log {
        site = site.layer(AccessLog::new());
    }
    if let Some(limit) = &middleware.rate_limit {
        site = site.layer(RateLimit::from_config(limit));
    }
    if middleware.security_headers {
        site = site.layer(SecurityHeaders::default());
    }

    let websocket = config
        .websocket
        .as_ref()
        .map(|ws| WebSocketProxyConfig {
            subprotocols: ws.subprotocols.clone(),
            headers: ws
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        })
        .unwrap_or_default();

    site.websocket_proxy(websocket)
}

/// Compile every configured site, preserving order.
pub fn compile_sites(configs: &[SiteConfig]) -> Vec<Site> {
    let sites: Vec<Site> = configs.iter().map(compile_site).collect();
    tracing::debug!(count = sites.len(), "Compiled config sites");
    sites
}
