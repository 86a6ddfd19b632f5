//! Forwarding client used in default mode.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::MemoryCache;
use crate::delayed::DelayedResponseRegistry;
use crate::protocol::{ConfigKey, ConfigRequest, RawConfig};
use crate::source::subscriber::{DeliveryGate, UpstreamSubscriber};
use crate::source::upstream::UpstreamSource;
use crate::source::ConfigSourceClient;
use crate::timing::TimingValues;

/// Answers from the cache when the client is behind, otherwise parks the
/// request and keeps its key subscribed upstream.
pub struct RpcConfigSourceClient {
    upstream: Arc<dyn UpstreamSource>,
    cache: Arc<MemoryCache>,
    registry: Arc<DelayedResponseRegistry>,
    timing: TimingValues,
    subscriptions: DashMap<ConfigKey, JoinHandle<()>>,
    gate: DeliveryGate,
}

impl RpcConfigSourceClient {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        cache: Arc<MemoryCache>,
        registry: Arc<DelayedResponseRegistry>,
        timing: TimingValues,
    ) -> Self {
        Self {
            upstream,
            cache,
            registry,
            timing,
            subscriptions: DashMap::new(),
            gate: DeliveryGate::new(),
        }
    }

    /// Keys with a live upstream subscription.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_closed()
    }

    /// Start the subscription for `key` unless one is already running.
    fn ensure_subscribed(&self, key: &ConfigKey) {
        if self.is_cancelled() {
            return;
        }

        let mut created = false;
        self.subscriptions.entry(key.clone()).or_insert_with(|| {
            created = true;
            let subscriber = UpstreamSubscriber::new(
                key.clone(),
                self.upstream.clone(),
                self.cache.clone(),
                self.registry.clone(),
                self.timing,
                self.gate.clone(),
            );
            tokio::spawn(subscriber.run())
        });

        // cancel() may have drained the map between the check above and the insert.
        if created && self.is_cancelled() {
            if let Some((_, handle)) = self.subscriptions.remove(key) {
                handle.abort();
            }
        }
    }
}

/// True if `config` is worth sending to a client holding `request`'s config now.
fn answers_now(config: &RawConfig, request: &ConfigRequest) -> bool {
    config.is_error() || config.differs_from(request.generation(), request.checksum())
}

impl ConfigSourceClient for RpcConfigSourceClient {
    fn get_config(&self, cached: Option<RawConfig>, request: &ConfigRequest) -> Option<RawConfig> {
        if let Some(config) = cached.filter(|c| answers_now(c, request)) {
            return Some(config);
        }

        let registration = self.registry.register(request.clone());
        tracing::debug!(
            request_id = %request.id(),
            key = %request.key(),
            generation = request.generation(),
            waiters = registration.waiters,
            "Parked config request"
        );
        self.ensure_subscribed(request.key());

        // A push may have landed between the cache read and the registration.
        if let Some(current) = self.cache.get(request.key()) {
            if answers_now(&current, request)
                && self.registry.remove(request.key(), request.id()).is_some()
            {
                tracing::debug!(
                    request_id = %request.id(),
                    key = %request.key(),
                    "Config changed while parking, answering now"
                );
                return Some(current);
            }
        }
        None
    }

    fn cancel(&self) {
        // Waits for in-flight deliveries, so the cache is quiet once this returns.
        self.gate.close();
        let mut aborted = 0;
        self.subscriptions.retain(|key, handle| {
            handle.abort();
            self.upstream.unsubscribe(key);
            aborted += 1;
            false
        });
        tracing::info!(subscriptions = aborted, "Cancelled upstream subscriptions");
    }

    fn shutdown_source_connections(&self) {
        self.upstream.shutdown();
    }

    fn active_source_connection(&self) -> String {
        self.upstream.active_connection()
    }

    fn source_connections(&self) -> Vec<String> {
        self.upstream.connections()
    }
}
