//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Build the server (sites, plugin setup) before binding
//! - Bind the listener, start the config watcher, wire signals to shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last, so traffic only arrives once setup succeeded

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, ProxyConfig};
use crate::http::server::ProxyServer;
use crate::lifecycle::{shutdown_signal, Shutdown};
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;
use crate::plugins::SetupError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build upstream TLS configuration: {0}")]
    Tls(#[source] rustls::Error),

    #[error(transparent)]
    Plugin(#[from] SetupError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the proxy until SIGINT/SIGTERM. `config_path` enables hot reload of
/// the sites defined in that file.
pub async fn run(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let listener_config = config.listener.clone();
    let server = ProxyServer::from_config(config).await?;
    let listener = Listener::bind(&listener_config).await?;

    // Dropping the watcher handle stops the watch, so it lives until return.
    let (_watcher, updates) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            (Some(watcher.run()?), Some(updates))
        }
        None => (None, None),
    };

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, updates, receiver).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
