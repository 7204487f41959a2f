//! Upstream TLS configuration.
//!
//! The gateway terminates no TLS itself; it only speaks TLS to `https` and
//! `wss` targets. Trust roots come from `webpki-roots`.

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

/// Client configuration shared by HTTP forwarding and health probes.
pub fn client_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Variant for WebSocket upstreams: the upgrade needs HTTP/1.1, so only
/// `http/1.1` is offered through ALPN.
pub fn websocket_client_config(base: &ClientConfig) -> Arc<ClientConfig> {
    let mut config = base.clone();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}
