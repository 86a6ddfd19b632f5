//! The config proxy: cache, parked requests, and the client for the current mode.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::AdminServer;
use crate::cache::{CacheError, MemoryCache};
use crate::config::ProxyConfig;
use crate::delayed::{DelayedResponseRegistry, DelayedResponseSweeper};
use crate::http::RpcServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::{self, ResolveOutcome};
use crate::protocol::{ConfigRequest, ErrorCode, RawConfig};
use crate::server::mode::{Mode, ModeError};
use crate::source::{
    ConfigSourceClient, HttpSourceConnector, MemoryCacheConfigClient, RpcConfigSourceClient,
    SourceError, SourceSet, UpstreamConnector,
};
use crate::timing::TimingValues;

/// How long `stop` waits for each background task.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to bind {address}: {error}")]
    Bind {
        address: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Proxy already started")]
    AlreadyStarted,
}

/// The (mode, client) pair requests read as one snapshot.
struct ActiveClient {
    mode: Mode,
    client: Arc<dyn ConfigSourceClient>,
}

/// Addresses the listeners actually bound (useful with port 0).
#[derive(Debug, Clone, Copy)]
pub struct BoundAddresses {
    pub rpc: SocketAddr,
    pub admin: Option<SocketAddr>,
}

/// Point-in-time statistics for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub version: &'static str,
    pub mode: Mode,
    pub cache_entries: usize,
    pub delayed_responses: usize,
    pub active_source: String,
    pub sources: Vec<String>,
}

pub struct ProxyServer {
    config: ProxyConfig,
    timing: TimingValues,
    cache: Arc<MemoryCache>,
    registry: Arc<DelayedResponseRegistry>,
    connector: Arc<dyn UpstreamConnector>,
    active: ArcSwap<ActiveClient>,
    /// Configured sources. Held while switching clients, so switches never interleave.
    sources: Mutex<SourceSet>,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ProxyServer {
    /// Build a proxy that reaches its sources over HTTP.
    pub fn with_http_upstream(config: ProxyConfig) -> Result<Self, ServerError> {
        Self::new(config, Arc::new(HttpSourceConnector::new()))
    }

    pub fn new(
        config: ProxyConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self, ServerError> {
        let mode: Mode = config.mode.parse()?;
        let sources = SourceSet::parse(&config.sources)?;
        let timing = TimingValues::from(&config.timing);
        let cache = Arc::new(MemoryCache::new());
        let registry = Arc::new(DelayedResponseRegistry::new());

        if let Some(path) = &config.cache.preload_path {
            let loaded = cache.load_from_file(Path::new(path))?;
            tracing::info!(path = %path, entries = loaded, "Preloaded config cache");
        }

        let proxy = Self {
            active: ArcSwap::from_pointee(ActiveClient {
                mode,
                client: Arc::new(MemoryCacheConfigClient::new(cache.clone())),
            }),
            config,
            timing,
            cache,
            registry,
            connector,
            sources: Mutex::new(sources),
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };
        if mode == Mode::Default {
            let sources = proxy.sources.lock().expect("sources mutex poisoned").clone();
            let client = proxy.rpc_client(&sources);
            proxy.active.store(Arc::new(ActiveClient { mode, client }));
        }

        tracing::info!(mode = %mode, sources = %proxy.sources.lock().expect("sources mutex poisoned"), "Config proxy created");
        Ok(proxy)
    }

    fn rpc_client(&self, sources: &SourceSet) -> Arc<dyn ConfigSourceClient> {
        let upstream = self.connector.connect(sources, &self.timing);
        Arc::new(RpcConfigSourceClient::new(
            upstream,
            self.cache.clone(),
            self.registry.clone(),
            self.timing,
        ))
    }

    /// Answer `request` now, or park it and return `None`.
    ///
    /// Never awaits: the answer comes from memory, or the request is parked and
    /// later answered through its responder by an upstream push or the sweeper.
    pub fn resolve_config(&self, request: &ConfigRequest) -> Option<RawConfig> {
        if let Err(e) = request.key().validate() {
            tracing::debug!(request_id = %request.id(), error = %e, "Rejected malformed config request");
            metrics::record_resolve(ResolveOutcome::Rejected);
            return Some(RawConfig::error(
                request.key().clone(),
                ErrorCode::IllegalDefinition,
                e.to_string(),
            ));
        }

        let cached = self.cache.get(request.key());
        let active = self.active.load();
        let answer = active.client.get_config(cached, request);

        metrics::record_resolve(if answer.is_some() {
            ResolveOutcome::Answered
        } else {
            ResolveOutcome::Parked
        });
        answer
    }

    pub fn get_mode(&self) -> Mode {
        self.active.load().mode
    }

    /// Switch mode. Returns false if already in `mode`.
    pub fn set_mode(&self, mode: Mode) -> bool {
        let sources = self.sources.lock().expect("sources mutex poisoned");
        let current = self.get_mode();
        if current == mode {
            return false;
        }

        let client: Arc<dyn ConfigSourceClient> = match mode {
            Mode::MemoryCache => {
                // The cache stays: it is all memorycache mode has to serve.
                self.discard_client();
                Arc::new(MemoryCacheConfigClient::new(self.cache.clone()))
            }
            Mode::Default => {
                self.flush();
                self.rpc_client(&sources)
            }
        };
        self.active.store(Arc::new(ActiveClient { mode, client }));
        drop(sources);

        metrics::record_mode_switch(mode.as_str());
        tracing::info!(from = %current, to = %mode, "Switched proxy mode");
        true
    }

    /// Parse and apply a mode name.
    pub fn set_mode_by_name(&self, name: &str) -> Result<bool, ModeError> {
        Ok(self.set_mode(name.parse()?))
    }

    /// Clear the cache and cancel the active client's upstream activity.
    ///
    /// Parked requests are left for the sweeper. The active client never
    /// subscribes again, so call this only when it is about to be replaced
    /// or at shutdown.
    pub fn flush(&self) {
        self.active.load().client.cancel();
        self.cache.clear();
        tracing::info!("Flushed config cache and upstream subscriptions");
    }

    fn discard_client(&self) {
        let active = self.active.load();
        active.client.cancel();
        active.client.shutdown_source_connections();
    }

    /// Replace the upstream source list. Implies a flush.
    pub fn update_source_connections<I, S>(&self, specs: I) -> Result<(), ServerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let new_sources = SourceSet::parse(specs)?;
        let mut sources = self.sources.lock().expect("sources mutex poisoned");

        match self.get_mode() {
            Mode::Default => {
                self.discard_client();
                self.cache.clear();
                let client = self.rpc_client(&new_sources);
                self.active.store(Arc::new(ActiveClient {
                    mode: Mode::Default,
                    client,
                }));
            }
            Mode::MemoryCache => {
                // Kept for the next switch to default mode.
                self.cache.clear();
            }
        }

        tracing::info!(from = %sources, to = %new_sources, "Updated config sources");
        *sources = new_sources;
        Ok(())
    }

    pub fn get_active_source_connection(&self) -> String {
        self.active.load().client.active_source_connection()
    }

    pub fn get_source_connections(&self) -> Vec<String> {
        self.active.load().client.source_connections()
    }

    /// Configured sources, whichever mode is active.
    pub fn configured_sources(&self) -> SourceSet {
        self.sources.lock().expect("sources mutex poisoned").clone()
    }

    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            version: env!("CARGO_PKG_VERSION"),
            mode: self.get_mode(),
            cache_entries: self.cache.len(),
            delayed_responses: self.registry.len(),
            active_source: self.get_active_source_connection(),
            sources: self.configured_sources().specs().to_vec(),
        }
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<DelayedResponseRegistry> {
        &self.registry
    }

    pub fn timing(&self) -> &TimingValues {
        &self.timing
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Start sweeping and bind the front door and admin listeners.
    pub async fn start(self: &Arc<Self>) -> Result<BoundAddresses, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let mut tasks = Vec::new();

        if self.config.sweeper.enabled {
            let sweeper = DelayedResponseSweeper::new(
                self.registry.clone(),
                self.cache.clone(),
                &self.config.sweeper,
            );
            tasks.push(tokio::spawn(sweeper.run(self.shutdown.subscribe())));
        }

        let rpc_listener = bind(&self.config.listener.rpc_address).await?;
        let rpc = local_addr(&rpc_listener, &self.config.listener.rpc_address)?;
        let front_door = RpcServer::new(self.clone());
        let shutdown_rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = front_door.run(rpc_listener, shutdown_rx).await {
                tracing::error!(error = %e, "Config RPC server failed");
            }
        }));

        let mut admin = None;
        if self.config.admin.enabled {
            let admin_listener = bind(&self.config.admin.bind_address).await?;
            admin = Some(local_addr(&admin_listener, &self.config.admin.bind_address)?);
            let server = AdminServer::new(self.clone());
            let shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(admin_listener, shutdown_rx).await {
                    tracing::error!(error = %e, "Admin server failed");
                }
            }));
        }

        self.tasks.lock().expect("tasks mutex poisoned").extend(tasks);
        tracing::info!(rpc = %rpc, admin = ?admin, mode = %self.get_mode(), "Config proxy started");
        Ok(BoundAddresses { rpc, admin })
    }

    /// Stop sweeping, close the listeners, drop parked requests and flush. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Config proxy stopping");

        self.shutdown.trigger();
        // Dropping parked requests releases their long polls so the listeners can drain.
        let dropped = self.registry.cancel_all();
        self.flush();
        self.active.load().client.shutdown_source_connections();

        let tasks: Vec<_> = self.tasks.lock().expect("tasks mutex poisoned").drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                tracing::warn!("Background task did not stop in time");
            }
        }
        tracing::info!(dropped_requests = dropped, "Config proxy stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|error| ServerError::Bind {
            address: address.to_string(),
            error,
        })
}

fn local_addr(listener: &TcpListener, address: &str) -> Result<SocketAddr, ServerError> {
    listener.local_addr().map_err(|error| ServerError::Bind {
        address: address.to_string(),
        error,
    })
}
