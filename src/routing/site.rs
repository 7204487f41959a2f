//! Site definition.
//!
//! A site binds a domain pattern to a route function, an ordered middleware
//! chain and a WebSocket mode. Sites are immutable once registered; changing
//! a site means registering a replacement.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::http::middleware::Middleware;
use crate::http::request::RequestContext;
use crate::http::websocket::{
    WebSocketConnection, WebSocketHandler, WebSocketMode, WebSocketProxyConfig,
};
use crate::load_balancer::LoadBalancer;
use crate::routing::matcher::DomainPattern;

/// Async route function: picks the target URL for a request, or `None`.
pub type RouteFn = Arc<dyn Fn(&RequestContext) -> BoxFuture<'static, Option<String>> + Send + Sync>;

#[derive(Clone)]
pub struct Site {
    domain: String,
    pattern: DomainPattern,
    route: RouteFn,
    middleware: Vec<Arc<dyn Middleware>>,
    websocket: WebSocketMode,
    balancer: Option<Arc<LoadBalancer>>,
    targets: Vec<String>,
}

impl Site {
    /// A site with no route; every request answers "No route found" until
    /// one is set.
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            pattern: DomainPattern::parse(&domain),
            domain,
            route: Arc::new(|_: &RequestContext| future::ready(None).boxed()),
            middleware: Vec::new(),
            websocket: WebSocketMode::default(),
            balancer: None,
            targets: Vec::new(),
        }
    }

    /// Set the route function.
    pub fn route<F, Fut>(mut self, route: F) -> Self
    where
        F: Fn(&RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        self.route = Arc::new(move |ctx: &RequestContext| route(ctx).boxed());
        self
    }

    /// Route every request to one fixed target.
    pub fn route_to(self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.route(move |_| future::ready(Some(target.clone())))
    }

    /// Route through `balancer` over `targets`. Sticky sessions key on the
    /// client IP, and forwarded requests are counted per target.
    pub fn balanced(mut self, targets: Vec<String>, balancer: Arc<LoadBalancer>) -> Self {
        let candidates = targets.clone();
        let lb = Arc::clone(&balancer);
        self.route = Arc::new(move |ctx: &RequestContext| {
            let picked = lb.get_target_for(&candidates, ctx.client_id().as_deref());
            future::ready(picked).boxed()
        });
        self.balancer = Some(balancer);
        self.targets = targets;
        self
    }

    /// Append a middleware; the first one added runs outermost.
    pub fn layer(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Terminate WebSocket upgrades locally and hand each connection to
    /// `handler`.
    pub fn websocket_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(WebSocketConnection, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: WebSocketHandler = Arc::new(move |conn, ctx| handler(conn, ctx).boxed());
        self.websocket = WebSocketMode::Terminate(handler);
        self
    }

    /// Proxy WebSocket upgrades to the routed target.
    pub fn websocket_proxy(mut self, config: WebSocketProxyConfig) -> Self {
        self.websocket = WebSocketMode::Proxy(config);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn pattern(&self) -> &DomainPattern {
        &self.pattern
    }

    /// Run the route function.
    pub fn resolve(&self, ctx: &RequestContext) -> BoxFuture<'static, Option<String>> {
        (self.route)(ctx)
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    pub fn websocket(&self) -> &WebSocketMode {
        &self.websocket
    }

    /// Balancer owned by this site, when it routes through one.
    pub fn balancer(&self) -> Option<&Arc<LoadBalancer>> {
        self.balancer.as_ref()
    }

    /// Targets known to the site's balancer (used by the health monitor).
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("domain", &self.domain)
            .field("middleware", &self.middleware.len())
            .field("websocket", &self.websocket)
            .field("targets", &self.targets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn ctx(addr: &str) -> RequestContext {
        let req = Request::builder()
            .uri("/")
            .header("Host", "example.com")
            .body(Body::empty())
            .unwrap();
        RequestContext::from_request(req, Some(addr.parse().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn default_route_is_none() {
        let site = Site::new("example.com");
        assert_eq!(site.resolve(&ctx("127.0.0.1:1")).await, None);
    }

    #[tokio::test]
    async fn route_to_is_constant() {
        let site = Site::new("example.com").route_to("http://127.0.0.1:9000");
        assert_eq!(
            site.resolve(&ctx("127.0.0.1:1")).await.as_deref(),
            Some("http://127.0.0.1:9000")
        );
    }

    #[tokio::test]
    async fn balanced_route_is_sticky_per_client_ip() {
        let lb = Arc::new(LoadBalancer::new(crate::load_balancer::StrategyKind::Sticky));
        let site = Site::new("example.com").balanced(
            vec!["http://a:80".into(), "http://b:80".into()],
            lb,
        );

        let first = site.resolve(&ctx("10.0.0.1:1000")).await;
        site.resolve(&ctx("10.0.0.2:1000")).await;
        let again = site.resolve(&ctx("10.0.0.1:2000")).await;
        assert!(first.is_some());
        assert_eq!(first, again);
        assert_eq!(site.targets().len(), 2);
        assert!(site.balancer().is_some());
    }

    #[tokio::test]
    async fn balanced_route_none_when_all_unhealthy() {
        let lb = Arc::new(LoadBalancer::default());
        lb.update_health("http://a:80", false, None);
        let site = Site::new("example.com").balanced(vec!["http://a:80".into()], lb);
        assert_eq!(site.resolve(&ctx("10.0.0.1:1")).await, None);
    }

    #[test]
    fn websocket_defaults_to_proxy() {
        let site = Site::new("example.com");
        assert!(matches!(site.websocket(), WebSocketMode::Proxy(_)));

        let site = site.websocket_handler(|_conn, _ctx| async {});
        assert!(matches!(site.websocket(), WebSocketMode::Terminate(_)));
    }
}
