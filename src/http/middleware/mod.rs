//! Per-site middleware chain.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → middleware[0].handle(ctx, next)
//!         → middleware[1].handle(ctx, next)
//!             → ... → Endpoint (forward to the routed target)
//!         ← Response
//!     ← Response
//! ```
//!
//! # Design Decisions
//! - Onion model: each middleware decides whether to call `next` and may
//!   inspect or rewrite the response on the way out
//! - The context moves through the chain by value
//! - The first middleware registered on a site runs outermost

pub mod access_log;

use std::sync::Arc;

use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::request::RequestContext;

pub use access_log::AccessLog;

/// A step in a site's middleware chain.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// Innermost step of a chain, reached when every middleware called `next`.
pub trait Endpoint: Send + Sync {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'_, Response>;
}

/// The remainder of the chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Hand the context to the next middleware, or to the endpoint once the
    /// chain is exhausted.
    pub async fn run(self, ctx: RequestContext) -> Response {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    chain: rest,
                    endpoint: self.endpoint,
                };
                head.handle(ctx, next).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}
