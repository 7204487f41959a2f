//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Site middleware chain:
//!     → rate_limit.rs (per-IP token bucket, 429 on exhaustion)
//!     → headers.rs (stage hardening response headers)
//!     → Forward to the routed target
//! ```
//!
//! # Design Decisions
//! - Both are opt-in per site through `[sites.middleware]`
//! - Fail closed: a rejected request never reaches the upstream

pub mod headers;
pub mod rate_limit;

pub use headers::SecurityHeaders;
pub use rate_limit::RateLimit;
