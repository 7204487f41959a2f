//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Build the axum `Router` that carries every request into the gateway
//! - Resolve the site, run the plugin pipeline, route, run site middleware
//!   and forward
//! - Hand WebSocket upgrades to the WebSocket engine
//! - Accept connections, apply config reloads, drain on shutdown
//!
//! # Data Flow
//! ```text
//! accept ─▶ serve_connection (HTTP/1.1 or h2c)
//!     ─▶ SetRequestId ─▶ TraceLayer ─▶ PropagateRequestId ─▶ dispatch
//!         upgrade?  ─▶ site ─▶ terminate | proxy_upgrade
//!         otherwise ─▶ site ─▶ pipeline ─▶ route ─▶ middleware ─▶ forward
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::forward::{build_client, parse_target, ForwardTo, Forwarder, HttpClient};
use crate::http::middleware::Next;
use crate::http::request::{request_host, RequestContext, UuidRequestId};
use crate::http::response::ProxyError;
use crate::http::websocket::{self, is_upgrade_request, WebSocketMode, WebSocketSettings};
use crate::lifecycle::startup::StartupError;
use crate::load_balancer::{LoadBalancer, TrackedBody};
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls;
use crate::observability::metrics;
use crate::plugins::{HealthCheckPlugin, Pipeline, PipelineOutcome, Plugin, ProxyContext};
use crate::routing::compile::compile_sites;
use crate::routing::{Site, SiteRegistry};

/// Everything a request needs, shared by all connections of one server.
struct Gateway {
    registry: SiteRegistry,
    pipeline: Pipeline,
    forwarder: Forwarder,
    websocket: WebSocketSettings,
}

impl Gateway {
    async fn handle(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let host = request_host(&request);

        let Some(site) = self.registry.match_host(host.as_deref()) else {
            tracing::debug!(host = host.as_deref().unwrap_or("-"), "No site for host");
            metrics::record_request(&method, 404, "none", start);
            return ProxyError::NoSite.into_response();
        };

        let mut ctx = match RequestContext::from_request(request, peer) {
            Ok(ctx) => ctx,
            Err(e) => return e.into_response(),
        };

        let response = match self.pipeline.run(&mut ctx).await {
            PipelineOutcome::Respond { mut response, .. } => {
                ctx.apply_staged_headers(response.headers_mut());
                response
            }
            PipelineOutcome::Continue => self.route_and_forward(&site, ctx).await,
        };

        metrics::record_request(&method, response.status().as_u16(), site.domain(), start);
        response
    }

    async fn route_and_forward(&self, site: &Site, ctx: RequestContext) -> Response {
        let (routed, target) = match self.resolve_target(site, &ctx).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let mut response = e.into_response();
                ctx.apply_staged_headers(response.headers_mut());
                return response;
            }
        };

        // Counted under the route's own string, the key the balancer
        // selects and health-checks by.
        let guard = site.balancer().map(|balancer| balancer.track(&routed));

        let endpoint = ForwardTo::new(&self.forwarder, target);
        let response = Next::new(site.middleware(), &endpoint).run(ctx).await;

        match guard {
            Some(guard) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(TrackedBody::new(body, guard)))
            }
            None => response,
        }
    }

    /// Run the site's route function. Returns the target as routed along
    /// with its parsed form.
    async fn resolve_target(
        &self,
        site: &Site,
        ctx: &RequestContext,
    ) -> Result<(String, url::Url), ProxyError> {
        match site.resolve(ctx).await {
            Some(target) => {
                let url = parse_target(&target)?;
                Ok((target, url))
            }
            None if site.balancer().is_some() => {
                tracing::warn!(site = %site.domain(), "No healthy targets");
                Err(ProxyError::NoHealthyTarget)
            }
            None => Err(ProxyError::NoRoute),
        }
    }

    async fn upgrade(&self, mut request: Request, peer: Option<SocketAddr>) -> Response {
        let host = request_host(&request);
        let Some(site) = self.registry.match_host(host.as_deref()) else {
            return ProxyError::NoSite.into_response();
        };

        let on_upgrade = hyper::upgrade::on(&mut request);
        let ctx = match RequestContext::from_request(request, peer) {
            Ok(ctx) => ctx,
            Err(e) => return e.into_response(),
        };

        let result = match site.websocket() {
            WebSocketMode::Terminate(handler) => {
                websocket::terminate(on_upgrade, ctx, Arc::clone(handler), &self.websocket)
            }
            WebSocketMode::Proxy(config) => match self.resolve_target(&site, &ctx).await {
                Ok((_, target)) => {
                    websocket::proxy_upgrade(on_upgrade, ctx, target, config, &self.websocket).await
                }
                Err(e) => Err(e),
            },
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }
}

async fn dispatch(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if is_upgrade_request(&request) {
        gateway.upgrade(request, peer).await
    } else {
        gateway.handle(request, peer).await
    }
}

/// Configures a [`ProxyServer`]: code-defined sites and plugins on top of
/// the configuration file.
pub struct ProxyServerBuilder {
    config: ProxyConfig,
    sites: Vec<Site>,
    plugins: Vec<Arc<dyn Plugin>>,
    balancer: Arc<LoadBalancer>,
}

impl ProxyServerBuilder {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            sites: Vec::new(),
            plugins: Vec::new(),
            balancer: Arc::new(LoadBalancer::default()),
        }
    }

    /// Register a site after the configured ones.
    pub fn site(mut self, site: Site) -> Self {
        self.sites.push(site);
        self
    }

    /// Register a plugin after the baseline and built-in plugins.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// The balancer shared through the baseline load-balancer plugin.
    pub fn balancer(&self) -> Arc<LoadBalancer> {
        Arc::clone(&self.balancer)
    }

    pub fn with_balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    /// Compile sites, run plugin setup hooks and assemble the server.
    pub async fn build(self) -> Result<ProxyServer, StartupError> {
        let ProxyServerBuilder {
            config,
            sites,
            plugins,
            balancer,
        } = self;

        let tls = tls::client_config().map_err(StartupError::Tls)?;
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
        let client = build_client(connect_timeout, Arc::clone(&tls));

        let mut all_sites = compile_sites(&config.sites);
        all_sites.extend(sites.iter().cloned());
        let registry = SiteRegistry::new(all_sites);

        let mut user_plugins: Vec<Arc<dyn Plugin>> = Vec::new();
        if let Some(path) = &config.plugins.health_path {
            user_plugins.push(Arc::new(HealthCheckPlugin::new(path.clone())));
        }
        user_plugins.extend(plugins);
        let pipeline = Pipeline::new(balancer, user_plugins);

        let config = Arc::new(config);
        let context = ProxyContext {
            config: Arc::clone(&config),
            registry: registry.clone(),
            plugins: pipeline.names(),
        };
        pipeline.setup(&context).await?;

        let gateway = Arc::new(Gateway {
            registry,
            pipeline,
            forwarder: Forwarder::from_client(client.clone()),
            websocket: WebSocketSettings {
                max_message_size: config.websocket.max_message_size,
                connect_timeout,
                tls,
            },
        });

        tracing::info!(
            sites = gateway.registry.len(),
            plugins = gateway.pipeline.len(),
            "Proxy server configured"
        );

        Ok(ProxyServer {
            config,
            gateway,
            static_sites: sites,
            client,
        })
    }
}

/// The reverse proxy: a site registry, a plugin pipeline and the
/// forwarding engines, served over one listener.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    gateway: Arc<Gateway>,
    /// Sites registered in code; kept across config reloads.
    static_sites: Vec<Site>,
    client: HttpClient,
}

impl ProxyServer {
    pub fn builder(config: ProxyConfig) -> ProxyServerBuilder {
        ProxyServerBuilder::new(config)
    }

    /// A server with only configuration-defined sites.
    pub async fn from_config(config: ProxyConfig) -> Result<Self, StartupError> {
        Self::builder(config).build().await
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.gateway.registry
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The gateway as an axum `Router`, for mounting into another server.
    /// Client addresses are read from `ConnectInfo<SocketAddr>` when present.
    pub fn router(&self) -> Router {
        Router::new().fallback(dispatch).with_state(Arc::clone(&self.gateway)).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// Replace the configured sites, keeping code-defined ones after them.
    pub fn apply_config(&self, config: &ProxyConfig) {
        apply_config(&self.gateway.registry, config, &self.static_sites);
    }

    /// Serve until `shutdown` fires, then drain open connections for up to
    /// `timeouts.shutdown_drain_secs` before aborting the rest.
    pub async fn run(
        self,
        listener: Listener,
        config_updates: Option<mpsc::UnboundedReceiver<ProxyConfig>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let http2 = self.config.listener.http2;
        tracing::info!(address = %addr, http2, "HTTP server starting");

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(
                self.gateway.registry.clone(),
                self.config.health_check.clone(),
                self.client.clone(),
            );
            tokio::spawn(monitor.run(shutdown.resubscribe()));
        }

        if let Some(updates) = config_updates {
            tokio::spawn(watch_config(
                self.gateway.registry.clone(),
                self.static_sites.clone(),
                updates,
                shutdown.resubscribe(),
            ));
        }

        let app = self.router();
        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            app.clone(),
                            http2,
                            shutdown.resubscribe(),
                            permit,
                            tracker.track(),
                        ));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        let drain = Duration::from_secs(self.config.timeouts.shutdown_drain_secs);
        tracing::info!(
            active = tracker.active_count(),
            deadline_secs = drain.as_secs(),
            "Draining connections"
        );
        let drained = tokio::time::timeout(drain, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Drain deadline elapsed, closing remaining connections"
            );
            connections.abort_all();
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn apply_config(registry: &SiteRegistry, config: &ProxyConfig, static_sites: &[Site]) {
    let mut sites = compile_sites(&config.sites);
    sites.extend(static_sites.iter().cloned());
    registry.update_sites(sites);
    tracing::info!(sites = registry.len(), "Site registry reloaded");
}

async fn watch_config(
    registry: SiteRegistry,
    static_sites: Vec<Site>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => apply_config(&registry, &config, &static_sites),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    http2: bool,
    mut shutdown: broadcast::Receiver<()>,
    _permit: ConnectionPermit,
    connection: ConnectionGuard,
) {
    let service = TowerToHyperService::new(app.map_request(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }));

    let builder = auto::Builder::new(TokioExecutor::new());
    let builder = if http2 {
        builder.http2_only()
    } else {
        builder.http1_only()
    };

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        tracing::debug!(connection = %connection.id(), peer_addr = %peer, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(router: Router, host: Option<&str>, path: &str) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(host) = host {
            builder = builder.header("Host", host);
        }
        let response = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn unknown_and_missing_host_are_site_not_found() {
        let server = ProxyServer::builder(ProxyConfig::default())
            .site(Site::new("example.com").route_to("http://127.0.0.1:9"))
            .build()
            .await
            .unwrap();

        let (status, body) = call(server.router(), Some("other.com"), "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Site not found");

        let (status, body) = call(server.router(), None, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Site not found");
    }

    #[tokio::test]
    async fn site_without_route_is_no_route() {
        let server = ProxyServer::builder(ProxyConfig::default())
            .site(Site::new("example.com"))
            .build()
            .await
            .unwrap();
        let (status, body) = call(server.router(), Some("example.com"), "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "No route found");
    }

    #[tokio::test]
    async fn balanced_site_without_healthy_target_is_unavailable() {
        let balancer = Arc::new(LoadBalancer::default());
        balancer.update_health("http://127.0.0.1:9", false, None);
        let site = Site::new("example.com").balanced(vec!["http://127.0.0.1:9".into()], balancer);
        let server = ProxyServer::builder(ProxyConfig::default())
            .site(site)
            .build()
            .await
            .unwrap();

        let (status, body) = call(server.router(), Some("example.com"), "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "No healthy targets");
    }

    #[tokio::test]
    async fn invalid_route_target_is_bad_gateway() {
        let server = ProxyServer::builder(ProxyConfig::default())
            .site(Site::new("example.com").route_to("not a url"))
            .build()
            .await
            .unwrap();
        let (status, _) = call(server.router(), Some("example.com"), "/").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn health_plugin_answers_before_routing() {
        let mut config = ProxyConfig::default();
        config.plugins.health_path = Some("/healthz".into());
        let server = ProxyServer::builder(config)
            .site(Site::new("example.com"))
            .build()
            .await
            .unwrap();

        let (status, body) = call(server.router(), Some("example.com"), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"healthy\""));
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let server = ProxyServer::builder(ProxyConfig::default()).build().await.unwrap();
        let response = server
            .router()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header("Host", "example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn reload_keeps_code_defined_sites() {
        let server = ProxyServer::builder(ProxyConfig::default())
            .site(Site::new("static.example.com"))
            .build()
            .await
            .unwrap();
        assert_eq!(server.registry().len(), 1);

        let reloaded = crate::config::load_config_str(
            r#"
            [[sites]]
            domain = "api.example.com"
            targets = ["http://127.0.0.1:9000"]
            "#,
        )
        .unwrap();
        server.apply_config(&reloaded);

        let sites = server.registry().snapshot();
        let domains: Vec<&str> = sites.iter().map(|s| s.domain()).collect();
        assert_eq!(domains, ["api.example.com", "static.example.com"]);
    }
}
