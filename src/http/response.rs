//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Define the request-level failure taxonomy
//! - Map each failure to the status code and body the client sees
//!
//! # Design Decisions
//! - "No site" and "No route" are both 404 but carry distinct bodies
//! - Upgrade failures answer without a body and close the connection
//! - Nothing here is retried; failures stay local to one request

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Failures that end a single request or upgrade.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No registered site matches the host.
    #[error("Site not found")]
    NoSite,

    /// The site matched but its route function produced no target.
    #[error("No route found")]
    NoRoute,

    /// A balanced site has no healthy target left.
    #[error("No healthy targets")]
    NoHealthyTarget,

    /// The route function produced something that is not a usable URL.
    #[error("invalid target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// Connecting to or exchanging with the upstream failed before any
    /// response head was received.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Missing or invalid WebSocket upgrade headers.
    #[error("websocket handshake failed: {0}")]
    Handshake(&'static str),

    /// The upstream answered a proxied upgrade with something other than 101.
    #[error("upstream rejected websocket upgrade with status {0}")]
    UpgradeRejected(StatusCode),

    /// The proxied upgrade failed before the upstream answered.
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailed(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoSite | ProxyError::NoRoute => StatusCode::NOT_FOUND,
            ProxyError::NoHealthyTarget => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BadRequest(_) | ProxyError::Handshake(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidTarget { .. }
            | ProxyError::UpstreamUnreachable(_)
            | ProxyError::UpgradeRejected(_)
            | ProxyError::UpgradeFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Failures after which the client connection must not be reused.
    fn closes_connection(&self) -> bool {
        matches!(
            self,
            ProxyError::Handshake(_) | ProxyError::UpgradeRejected(_) | ProxyError::UpgradeFailed(_)
        )
    }

    fn body(&self) -> Body {
        match self {
            ProxyError::NoSite => Body::from("Site not found"),
            ProxyError::NoRoute => Body::from("No route found"),
            ProxyError::NoHealthyTarget => Body::from("No healthy targets"),
            ProxyError::BadRequest(_) => Body::from("Bad Request"),
            ProxyError::InvalidTarget { .. } | ProxyError::UpstreamUnreachable(_) => {
                Body::from("Bad Gateway")
            }
            ProxyError::Handshake(_)
            | ProxyError::UpgradeRejected(_)
            | ProxyError::UpgradeFailed(_) => Body::empty(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.body());
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        if self.closes_connection() {
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        } else {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }
        response
    }
}
