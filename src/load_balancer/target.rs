//! Target abstraction.
//!
//! # Responsibilities
//! - Represent the tracked health of a single upstream target
//! - RAII accounting of in-flight connections (for Least Connections)
//! - Keep the accounting alive until a streamed response body finishes

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use axum::body::Body;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use serde::Serialize;

use crate::load_balancer::LoadBalancer;

/// Last known health of a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetHealth {
    pub url: String,
    pub healthy: bool,
    pub last_check: SystemTime,
    pub response_time: Option<Duration>,
}

impl TargetHealth {
    pub fn healthy(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            healthy: true,
            last_check: SystemTime::now(),
            response_time: None,
        }
    }
}

/// A RAII guard that manages the tracked connection count of one target.
#[derive(Debug)]
pub struct ConnectionGuard {
    balancer: Arc<LoadBalancer>,
    target: String,
}

impl ConnectionGuard {
    pub(crate) fn new(balancer: Arc<LoadBalancer>, target: String) -> Self {
        Self { balancer, target }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.balancer.decrement_connections(&self.target);
    }
}

/// Response body that holds a [`ConnectionGuard`] until the body is fully
/// streamed or dropped.
pub struct TrackedBody {
    inner: Body,
    _guard: ConnectionGuard,
}

impl TrackedBody {
    pub fn new(inner: Body, guard: ConnectionGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl http_body::Body for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
