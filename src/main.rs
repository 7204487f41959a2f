//! edge-proxy binary.
//!
//! ```text
//! edge-proxy --config proxy.toml [--bind 0.0.0.0:8080] [--http2]
//! ```
//!
//! Without `--config` the proxy starts with defaults and no sites.

use std::path::PathBuf;

use clap::Parser;

use edge_proxy::config::{load_config, ProxyConfig};
use edge_proxy::lifecycle::startup;
use edge_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "edge-proxy", version)]
#[command(about = "Programmable reverse proxy and edge gateway", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for site changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Serve HTTP/2 cleartext only (disables WebSocket upgrades)
    #[arg(long)]
    http2: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if cli.http2 {
        config.listener.http2 = true;
    }

    logging::init(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        sites = config.sites.len(),
        "edge-proxy starting"
    );

    startup::run(config, cli.config).await?;
    Ok(())
}
