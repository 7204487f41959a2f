//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, active gauge)
//!     → Hand off to HTTP layer
//!
//! Outgoing connection to a target
//!     → tls.rs (rustls client config for https / wss)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS only on the upstream side

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::ConnectionTracker;
pub use listener::{Listener, ListenerError};
