//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics exporter → ProxyServer (sites, plugin setup)
//!     → bind listener → config watcher → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain connections → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: plugin setup completes before the listener binds
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has a deadline: remaining connections are aborted after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::StartupError;
