//! Host-based edge gateway: virtual sites, plugins, load balancing and
//! WebSocket handling in front of upstream HTTP services.

pub mod acme;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod plugins;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::{ProxyError, ProxyServer, ProxyServerBuilder, RequestContext};
pub use lifecycle::Shutdown;
pub use load_balancer::{LoadBalancer, StrategyKind};
pub use plugins::Plugin;
pub use routing::{Site, SiteRegistry};
