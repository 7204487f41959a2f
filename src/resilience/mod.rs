//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection to a target:
//!     → timeouts.rs (enforce connect deadline)
//!     → On failure: surface to the caller (502 / closed upgrade), no retry
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external connect has a deadline
//! - Failures stay local to one request or connection

pub mod timeouts;
