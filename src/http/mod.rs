//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, request id, dispatch)
//!     → request.rs (RequestContext: host, path, staged headers)
//!     → plugins, then the site's route picks a target
//!     → middleware/ (per-site onion chain)
//!     → forward.rs (upstream request over the shared client)
//!     → response.rs (error mapping)
//! ```

pub mod forward;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::Forwarder;
pub use request::{RequestContext, UuidRequestId, X_REQUEST_ID};
pub use response::ProxyError;
pub use server::{ProxyServer, ProxyServerBuilder};
pub use websocket::{WebSocketConnection, WebSocketHandler, WebSocketMode, WebSocketProxyConfig};
