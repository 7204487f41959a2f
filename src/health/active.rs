//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every target of balanced sites
//! - Record health and response time on the owning site's balancer

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Method, Request};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::http::forward::{parse_target, upstream_uri, HttpClient};
use crate::observability::metrics;
use crate::routing::SiteRegistry;

const USER_AGENT: &str = concat!("edge-proxy-health-check/", env!("CARGO_PKG_VERSION"));

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub target: String,
    pub healthy: bool,
    pub response_time: Duration,
}

pub struct HealthMonitor {
    registry: SiteRegistry,
    config: HealthCheckConfig,
    client: HttpClient,
}

impl HealthMonitor {
    pub fn new(registry: SiteRegistry, config: HealthCheckConfig, client: HttpClient) -> Self {
        Self {
            registry,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every target of every balanced site once. Sites sharing a
    /// target each get their own probe result.
    pub async fn check_all(&self) -> Vec<ProbeResult> {
        let sites = self.registry.snapshot();
        let mut results = Vec::new();

        for site in sites.iter() {
            let Some(balancer) = site.balancer() else {
                continue;
            };
            let probes = site.targets().iter().map(|target| self.probe(target));
            for result in join_all(probes).await {
                balancer.update_health(&result.target, result.healthy, Some(result.response_time));
                metrics::record_target_health(&result.target, result.healthy);
                results.push(result);
            }
        }
        results
    }

    async fn probe(&self, target: &str) -> ProbeResult {
        let start = Instant::now();
        let healthy = match self.request(target).await {
            Ok(status) if status.is_success() => true,
            Ok(status) => {
                tracing::warn!(target = %target, status = %status, "Health check failed: non-success status");
                false
            }
            Err(reason) => {
                tracing::warn!(target = %target, reason = %reason, "Health check failed");
                false
            }
        };
        ProbeResult {
            target: target.to_owned(),
            healthy,
            response_time: start.elapsed(),
        }
    }

    async fn request(&self, target: &str) -> Result<axum::http::StatusCode, String> {
        let url = parse_target(target).map_err(|e| e.to_string())?;
        let uri = upstream_uri(&url, &self.config.path).map_err(|e| e.to_string())?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(response.status()),
            Ok(Err(e)) => Err(format!("connection error: {e}")),
            Err(_) => Err("timeout".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use crate::http::forward::build_client;
    use crate::load_balancer::LoadBalancer;
    use crate::net::tls;
    use crate::routing::Site;

    async fn upstream(status: StatusCode) -> String {
        let app = Router::new().route("/health", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn marks_failing_targets_unhealthy() {
        let good = upstream(StatusCode::OK).await;
        let bad = upstream(StatusCode::INTERNAL_SERVER_ERROR).await;

        let balancer = Arc::new(LoadBalancer::default());
        let site = Site::new("example.com").balanced(vec![good.clone(), bad.clone()], Arc::clone(&balancer));
        let registry = SiteRegistry::new(vec![site]);

        let config = HealthCheckConfig {
            enabled: true,
            timeout_secs: 2,
            ..HealthCheckConfig::default()
        };
        let client = build_client(Duration::from_secs(1), tls::client_config().unwrap());
        let monitor = HealthMonitor::new(registry, config, client);

        let results = monitor.check_all().await;
        assert_eq!(results.len(), 2);
        assert!(balancer.is_healthy(&good));
        assert!(!balancer.is_healthy(&bad));
        assert_eq!(balancer.get_target(&[good.clone(), bad]), Some(good.clone()));
        assert!(balancer.health_status()[&good].response_time.is_some());
    }

    #[tokio::test]
    async fn disabled_monitor_returns_immediately() {
        let client = build_client(Duration::from_secs(1), tls::client_config().unwrap());
        let monitor = HealthMonitor::new(SiteRegistry::default(), HealthCheckConfig::default(), client);
        let (_tx, rx) = broadcast::channel(1);
        tokio::time::timeout(Duration::from_secs(1), monitor.run(rx))
            .await
            .unwrap();
    }
}
