//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (weights reference declared targets)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect conflicting sites
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{ProxyConfig, SiteConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("site domain `{0}` is malformed")]
    MalformedDomain(String),

    #[error("site `{0}` is declared more than once")]
    DuplicateDomain(String),

    #[error("site `{0}` has no targets")]
    NoTargets(String),

    #[error("site `{domain}` target `{target}` is invalid: {reason}")]
    InvalidTarget {
        domain: String,
        target: String,
        reason: String,
    },

    #[error("site `{domain}` has a weight for unknown target `{target}`")]
    UnknownWeightTarget { domain: String, target: String },

    #[error("site `{0}` rate limit must be greater than zero")]
    ZeroRateLimit(String),

    #[error("health_check.interval_secs must be greater than zero")]
    ZeroHealthInterval,

    #[error("health_check.path must start with `/`")]
    HealthPath,

    #[error("websocket.max_message_size must be greater than zero")]
    ZeroMessageSize,

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check every semantic rule and report all violations.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    let mut seen = HashSet::new();
    for site in &config.sites {
        if !seen.insert(site.domain.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateDomain(site.domain.clone()));
        }
        validate_site(site, &mut errors);
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::ZeroHealthInterval);
        }
        if !config.health_check.path.starts_with('/') {
            errors.push(ValidationError::HealthPath);
        }
    }
    if config.websocket.max_message_size == 0 {
        errors.push(ValidationError::ZeroMessageSize);
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_site(site: &SiteConfig, errors: &mut Vec<ValidationError>) {
    if !is_valid_domain(&site.domain) {
        errors.push(ValidationError::MalformedDomain(site.domain.clone()));
    }
    if site.targets.is_empty() {
        errors.push(ValidationError::NoTargets(site.domain.clone()));
    }
    for target in &site.targets {
        if let Err(reason) = validate_target(target) {
            errors.push(ValidationError::InvalidTarget {
                domain: site.domain.clone(),
                target: target.clone(),
                reason,
            });
        }
    }
    for target in site.weights.keys() {
        if !site.targets.contains(target) {
            errors.push(ValidationError::UnknownWeightTarget {
                domain: site.domain.clone(),
                target: target.clone(),
            });
        }
    }
    if let Some(limit) = &site.middleware.rate_limit {
        if limit.requests_per_second == 0 || limit.burst_size == 0 {
            errors.push(ValidationError::ZeroRateLimit(site.domain.clone()));
        }
    }
}

/// A domain is a host name with an optional port, optionally prefixed by
/// `*.`. No other `*` is allowed.
fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    !name.is_empty()
        && !name.contains('*')
        && !name.starts_with('.')
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'))
}

/// Parse a target URL and check it can be forwarded to.
pub fn validate_target(target: &str) -> Result<Url, String> {
    let url = Url::parse(target).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(url)
}
