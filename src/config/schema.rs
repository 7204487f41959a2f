//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::StrategyKind;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, HTTP/2, backpressure).
    pub listener: ListenerConfig,

    /// Sites served by this gateway, in match order.
    pub sites: Vec<SiteConfig>,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// WebSocket engine limits.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Optional built-in plugins.
    pub plugins: PluginsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Serve HTTP/2 cleartext only. WebSocket upgrades need HTTP/1.1.
    pub http2: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            http2: false,
        }
    }
}

/// A site whose routing comes entirely from configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SiteConfig {
    /// Exact domain or `*.`-prefixed wildcard.
    pub domain: String,

    /// Upstream target URLs (http, https, ws or wss).
    pub targets: Vec<String>,

    /// Load balancing strategy across `targets`.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Per-target weights for the weighted strategy (missing = 1).
    #[serde(default)]
    pub weights: BTreeMap<String, u32>,

    /// WebSocket proxy settings; upgrades are proxied either way.
    #[serde(default)]
    pub websocket: Option<SiteWebSocketConfig>,

    #[serde(default)]
    pub middleware: SiteMiddlewareConfig,
}

/// Extra settings for proxied WebSocket upgrades.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SiteWebSocketConfig {
    /// Subprotocols offered to the upstream.
    pub subprotocols: Vec<String>,

    /// Headers added to the upstream upgrade request.
    pub headers: BTreeMap<String, String>,
}

/// Built-in middleware enabled for a site.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SiteMiddlewareConfig {
    /// Log each completed request.
    pub access_log: bool,

    /// Add standard security headers to responses.
    pub security_headers: bool,

    /// Token-bucket rate limit per client IP.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for SiteMiddlewareConfig {
    fn default() -> Self {
        Self {
            access_log: true,
            security_headers: false,
            rate_limit: None,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second per IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks for config sites.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path probed on each target.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            shutdown_drain_secs: 10,
        }
    }
}

/// WebSocket engine limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest accepted message (after reassembly) in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Built-in plugins switched on from configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    /// Answer this path with a JSON health document on every site.
    pub health_path: Option<String>,
}
