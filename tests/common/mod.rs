//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use config_proxy::config::{ProxyConfig, SweeperConfig};
use config_proxy::delayed::DelayedResponseSweeper;
use config_proxy::protocol::{ConfigKey, ConfigReply, ConfigRequest};
use config_proxy::server::{BoundAddresses, ProxyServer};
use config_proxy::source::{ChannelUpstream, UpstreamConnector};

pub fn key(config_id: &str) -> ConfigKey {
    ConfigKey::new("sentinel", "cloud.config", "", config_id)
}

/// Config for a proxy listening on ephemeral loopback ports.
pub fn test_config(mode: &str, sweep_interval_ms: u64) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.mode = mode.to_string();
    config.listener.rpc_address = "127.0.0.1:0".to_string();
    config.admin.bind_address = "127.0.0.1:0".to_string();
    config.admin.api_key = "test-key".to_string();
    config.sweeper = SweeperConfig {
        enabled: true,
        initial_delay_ms: 0,
        interval_ms: sweep_interval_ms,
    };
    config
}

/// A proxy fed by an in-process upstream, not started.
pub fn channel_proxy(mode: &str, sweep_interval_ms: u64) -> (Arc<ProxyServer>, ChannelUpstream) {
    let upstream = ChannelUpstream::new();
    let proxy = ProxyServer::new(test_config(mode, sweep_interval_ms), Arc::new(upstream.clone()))
        .expect("valid test config");
    (Arc::new(proxy), upstream)
}

/// Start listeners and sweeper for `config`.
pub async fn start_proxy(
    config: ProxyConfig,
    connector: Arc<dyn UpstreamConnector>,
) -> (Arc<ProxyServer>, BoundAddresses) {
    let proxy = Arc::new(ProxyServer::new(config, connector).expect("valid test config"));
    let addresses = proxy.start().await.expect("proxy starts");
    (proxy, addresses)
}

/// Run a sweeper over `proxy`'s registry without binding any listener.
/// Drop the returned sender to stop it.
pub fn spawn_sweeper(proxy: &ProxyServer, interval_ms: u64) -> broadcast::Sender<()> {
    let (tx, rx) = broadcast::channel(1);
    let config = SweeperConfig {
        enabled: true,
        initial_delay_ms: 0,
        interval_ms,
    };
    let sweeper = DelayedResponseSweeper::new(proxy.registry().clone(), proxy.cache().clone(), &config);
    tokio::spawn(sweeper.run(rx));
    tx
}

/// Resolve through the proxy API the way the front door does.
pub fn resolve(
    proxy: &ProxyServer,
    key: ConfigKey,
    generation: u64,
    checksum: &str,
    timeout: Duration,
) -> oneshot::Receiver<ConfigReply> {
    let (request, rx) = ConfigRequest::new(key, generation, checksum, timeout);
    if let Some(answer) = proxy.resolve_config(&request) {
        request.respond(&answer);
    }
    rx
}

/// POST a resolve call to a running front door.
pub async fn resolve_http(
    client: &reqwest::Client,
    rpc: SocketAddr,
    key: &ConfigKey,
    generation: u64,
    checksum: &str,
    timeout_ms: u64,
) -> reqwest::Response {
    client
        .post(format!("http://{}/config/v1/resolve", rpc))
        .json(&serde_json::json!({
            "def_name": key.def_name,
            "def_namespace": key.def_namespace,
            "def_md5": key.def_md5,
            "config_id": key.config_id,
            "generation": generation,
            "checksum": checksum,
            "timeout_ms": timeout_ms,
        }))
        .send()
        .await
        .expect("front door reachable")
}
