//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header or :authority)
//!     → registry.rs (snapshot of the site list)
//!     → matcher.rs (exact pass, then wildcard pass)
//!     → Return: matched Site or "Site not found"
//!
//! Site Compilation (startup and reload):
//!     SiteConfig[]
//!     → compile.rs (balancer per site, middleware, websocket mode)
//!     → registry.update_sites (atomic swap)
//! ```
//!
//! # Design Decisions
//! - Sites are immutable once registered, the list is swapped wholesale
//! - No regex in hot path (suffix matching only)
//! - Deterministic: same host always resolves to the same site

pub mod compile;
pub mod matcher;
pub mod registry;
pub mod site;

pub use matcher::DomainPattern;
pub use registry::SiteRegistry;
pub use site::{RouteFn, Site};
