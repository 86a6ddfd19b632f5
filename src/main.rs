//! Config proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                     CONFIG PROXY                       │
//!                    │                                                        │
//!   Config client    │  ┌──────────┐    ┌─────────────┐    ┌──────────────┐   │
//!   ─────────────────┼─▶│   http   │───▶│   server    │───▶│    source    │   │
//!   long poll        │  │front door│    │ ProxyServer │    │ Rpc / Memory │   │
//!                    │  └──────────┘    └──────┬──────┘    └──────┬───────┘   │
//!                    │        ▲                │                  │           │   Config
//!                    │        │          ┌─────▼─────┐     ┌──────▼───────┐   │   source
//!   Reply            │        │          │   cache   │◀────│  subscriber  │◀──┼── cluster
//!   ◀────────────────┼────────┤          └───────────┘     └──────┬───────┘   │
//!                    │        │          ┌───────────┐            │           │
//!                    │        └──────────│  delayed  │◀───────────┘           │
//!                    │                   │ registry  │◀── sweeper (timeouts)  │
//!                    │                   └───────────┘                        │
//!                    │  ┌──────────────────────────────────────────────────┐  │
//!                    │  │ config · admin · lifecycle · observability       │  │
//!                    │  └──────────────────────────────────────────────────┘  │
//!                    └───────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use config_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use config_proxy::lifecycle::wait_for_signal;
use config_proxy::observability::{logging, metrics};
use config_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "config-proxy", version, about = "Caching long-poll proxy for config clients")]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "config-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy = Arc::new(ProxyServer::with_http_upstream(config.clone())?);
    let addresses = proxy.start().await?;
    tracing::info!(rpc = %addresses.rpc, admin = ?addresses.admin, "Listening");

    // Dropping the watcher stops it, so keep it for the life of the process.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => {
                    tokio::spawn(apply_reloads(proxy.clone(), config, updates));
                    Some(watcher)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    wait_for_signal().await;
    proxy.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Apply the parts of a reloaded config that can change at runtime.
async fn apply_reloads(
    proxy: Arc<ProxyServer>,
    mut current: ProxyConfig,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
) {
    while let Some(config) = updates.recv().await {
        if config.sources != current.sources {
            if let Err(e) = proxy.update_source_connections(&config.sources) {
                tracing::error!(error = %e, "Failed to apply reloaded sources");
            }
        }
        if config.mode != current.mode {
            if let Err(e) = proxy.set_mode_by_name(&config.mode) {
                tracing::error!(error = %e, "Failed to apply reloaded mode");
            }
        }
        current = config;
    }
}
