//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (RPS, latency, errors, connections)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-site and per-target metrics
//!
//! # Metrics
//! - `proxy_requests_total` (counter): completed requests by method, status, site
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_requests_received_total` (counter): requests entering the pipeline
//! - `proxy_upstream_errors_total` (counter): failed upstream exchanges
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_websocket_sessions_total` / `proxy_websocket_active` : upgrades
//! - `proxy_target_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_rate_limited_total` (counter): requests answered with 429
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels for site, target, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "proxy_requests_total";
pub const REQUEST_DURATION: &str = "proxy_request_duration_seconds";
pub const REQUESTS_RECEIVED: &str = "proxy_requests_received_total";
pub const UPSTREAM_ERRORS: &str = "proxy_upstream_errors_total";
pub const ACTIVE_CONNECTIONS: &str = "proxy_active_connections";
pub const WEBSOCKET_SESSIONS: &str = "proxy_websocket_sessions_total";
pub const WEBSOCKET_ACTIVE: &str = "proxy_websocket_active";
pub const TARGET_HEALTH: &str = "proxy_target_health";
pub const RATE_LIMITED: &str = "proxy_rate_limited_total";

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Register descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Completed requests by method, status and site");
    describe_histogram!(REQUEST_DURATION, "Request latency in seconds");
    describe_counter!(REQUESTS_RECEIVED, "Requests entering the plugin pipeline");
    describe_counter!(UPSTREAM_ERRORS, "Failed upstream exchanges by kind");
    describe_gauge!(ACTIVE_CONNECTIONS, "Open client connections");
    describe_counter!(WEBSOCKET_SESSIONS, "WebSocket upgrades by mode");
    describe_gauge!(WEBSOCKET_ACTIVE, "Open WebSocket sessions by mode");
    describe_gauge!(TARGET_HEALTH, "Target health (1 healthy, 0 unhealthy)");
    describe_counter!(RATE_LIMITED, "Requests rejected by rate limiting");
}

pub fn record_request(method: &str, status: u16, site: &str, start: Instant) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "status" => status.to_string(),
        "site" => site.to_owned()
    )
    .increment(1);
    histogram!(REQUEST_DURATION, "site" => site.to_owned()).record(start.elapsed().as_secs_f64());
}

pub fn record_request_received(method: &str) {
    counter!(REQUESTS_RECEIVED, "method" => method.to_owned()).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!(UPSTREAM_ERRORS, "kind" => kind).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

pub fn record_websocket_opened(mode: &'static str) {
    counter!(WEBSOCKET_SESSIONS, "mode" => mode).increment(1);
    gauge!(WEBSOCKET_ACTIVE, "mode" => mode).increment(1.0);
}

pub fn record_websocket_closed(mode: &'static str) {
    gauge!(WEBSOCKET_ACTIVE, "mode" => mode).decrement(1.0);
}

pub fn record_target_health(target: &str, healthy: bool) {
    gauge!(TARGET_HEALTH, "target" => target.to_owned()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_rate_limited(site: &str) {
    counter!(RATE_LIMITED, "site" => site.to_owned()).increment(1);
}
