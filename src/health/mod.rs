//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each target of every balanced site (GET <target><path>)
//!     → LoadBalancer::update_health on the owning site's balancer
//!     → Target health gauge
//! ```
//!
//! # Design Decisions
//! - Health is per balancer: a target shared by two sites is tracked twice
//! - A single failed probe marks a target unhealthy; the next success
//!   restores it
//! - The monitor reads the live registry, so reloaded sites are probed on
//!   the next tick

pub mod active;

pub use active::{HealthMonitor, ProbeResult};
