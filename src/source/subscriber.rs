//! Per-key upstream subscription task.

use futures_util::StreamExt;
use std::sync::{Arc, RwLock};

use crate::cache::MemoryCache;
use crate::delayed::DelayedResponseRegistry;
use crate::observability::metrics;
use crate::protocol::{ConfigKey, RawConfig};
use crate::source::upstream::UpstreamSource;
use crate::timing::TimingValues;

/// Off switch shared by a client and its subscribers.
///
/// A delivery runs under the read side, `close` takes the write side, so once
/// `close` returns no subscriber writes to the cache or answers a waiter again.
#[derive(Debug, Clone, Default)]
pub struct DeliveryGate(Arc<RwLock<bool>>);

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate, waiting out any delivery in progress.
    pub fn close(&self) {
        *self.0.write().expect("delivery gate poisoned") = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.0.read().expect("delivery gate poisoned")
    }

    /// Run `deliver` unless the gate is closed. Returns false if it was.
    fn run(&self, deliver: impl FnOnce()) -> bool {
        let closed = self.0.read().expect("delivery gate poisoned");
        if *closed {
            return false;
        }
        deliver();
        true
    }
}

/// Keeps one key subscribed upstream and feeds every push into the cache and
/// the waiters parked on that key.
///
/// Runs until its task is aborted. A broken subscription is re-established
/// after [`TimingValues::error_delay`], from the generation currently cached.
pub struct UpstreamSubscriber {
    key: ConfigKey,
    upstream: Arc<dyn UpstreamSource>,
    cache: Arc<MemoryCache>,
    registry: Arc<DelayedResponseRegistry>,
    timing: TimingValues,
    gate: DeliveryGate,
}

impl UpstreamSubscriber {
    pub fn new(
        key: ConfigKey,
        upstream: Arc<dyn UpstreamSource>,
        cache: Arc<MemoryCache>,
        registry: Arc<DelayedResponseRegistry>,
        timing: TimingValues,
        gate: DeliveryGate,
    ) -> Self {
        Self {
            key,
            upstream,
            cache,
            registry,
            timing,
            gate,
        }
    }

    pub async fn run(self) {
        let mut configured = false;
        let mut failures: u32 = 0;

        loop {
            let from_generation = self
                .cache
                .get(&self.key)
                .filter(|c| !c.is_error())
                .map(|c| c.generation)
                .unwrap_or(0);

            tracing::debug!(key = %self.key, from_generation, "Subscribing to config");
            let mut stream = self.upstream.subscribe(&self.key, from_generation);

            while let Some(item) = stream.next().await {
                match item {
                    Ok(config) if config.is_error() => {
                        tracing::warn!(
                            key = %self.key,
                            code = ?config.error_code(),
                            "Upstream returned error config"
                        );
                        if !self.gate.run(|| self.deliver_error(config)) {
                            return;
                        }
                        break;
                    }
                    Ok(config) => {
                        configured = true;
                        failures = 0;
                        if !self.gate.run(|| self.deliver(config)) {
                            tracing::debug!(key = %self.key, "Subscription closed, dropping push");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            key = %self.key,
                            source = %self.upstream.active_connection(),
                            error = %e,
                            "Config subscription failed"
                        );
                        break;
                    }
                }
            }
            drop(stream);
            if self.gate.is_closed() {
                return;
            }

            failures = failures.saturating_add(1);
            metrics::record_upstream_error();
            let delay = self.timing.error_delay(configured, failures);
            tracing::debug!(
                key = %self.key,
                failures,
                delay_ms = delay.as_millis() as u64,
                "Retrying config subscription after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Cache a pushed config and answer the waiters on its key.
    ///
    /// Waiters are answered only when the cache changed: a push equal to the
    /// cached value cannot be news to anyone parked against it.
    fn deliver(&self, config: RawConfig) {
        let generation = config.generation;
        if !self.cache.update(config) {
            tracing::debug!(key = %self.key, generation, "Pushed config already cached");
            return;
        }
        if let Some(current) = self.cache.get(&self.key) {
            let answered = self.registry.resolve_all(&self.key, &current);
            tracing::debug!(key = %self.key, generation, answered, "New config from upstream");
        }
    }

    fn deliver_error(&self, config: RawConfig) {
        if let Some(ttl) = self.timing.error_cache_ttl() {
            self.cache.update_error(config.clone(), ttl);
        }
        self.registry.resolve_all(&self.key, &config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConfigReply, ConfigRequest, ErrorCode};
    use crate::source::ChannelUpstream;
    use std::time::Duration;

    fn key() -> ConfigKey {
        ConfigKey::new("sentinel", "cloud.config", "", "hosts/foo")
    }

    struct Fixture {
        upstream: ChannelUpstream,
        cache: Arc<MemoryCache>,
        registry: Arc<DelayedResponseRegistry>,
        gate: DeliveryGate,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(timing: TimingValues) -> Fixture {
        let upstream = ChannelUpstream::new();
        let cache = Arc::new(MemoryCache::new());
        let registry = Arc::new(DelayedResponseRegistry::new());
        let gate = DeliveryGate::new();
        let subscriber = UpstreamSubscriber::new(
            key(),
            Arc::new(upstream.clone()),
            cache.clone(),
            registry.clone(),
            timing,
            gate.clone(),
        );
        let task = tokio::spawn(subscriber.run());
        Fixture {
            upstream,
            cache,
            registry,
            gate,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_updates_cache_and_waiters() {
        let fixture = start(TimingValues::proxy_defaults());
        let (request, rx) = ConfigRequest::new(key(), 3, "c3", Duration::from_secs(60));
        fixture.registry.register(request);

        tokio::task::yield_now().await;
        fixture.upstream.push(RawConfig::new(key(), 4, "c4", "four"));

        match rx.await.unwrap() {
            ConfigReply::Changed { generation, payload, .. } => {
                assert_eq!(generation, 4);
                assert_eq!(payload, "four");
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(fixture.cache.get(&key()).unwrap().generation, 4);
        fixture.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_failure() {
        let fixture = start(TimingValues::proxy_defaults());
        tokio::task::yield_now().await;
        fixture.upstream.push(RawConfig::new(key(), 1, "c1", "one"));
        tokio::task::yield_now().await;
        assert_eq!(fixture.upstream.subscription_count(&key()), 1);

        fixture.upstream.fail(&key());
        // Configured once, so the configured error delay applies (plus jitter).
        tokio::time::sleep(Duration::from_millis(13_500)).await;
        assert_eq!(fixture.upstream.subscription_count(&key()), 2);
        assert_eq!(fixture.cache.get(&key()).unwrap().generation, 1);
        fixture.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_push_answers_waiters_without_caching() {
        let fixture = start(TimingValues::proxy_defaults());
        let (request, rx) = ConfigRequest::new(key(), 0, "", Duration::from_secs(60));
        fixture.registry.register(request);

        tokio::task::yield_now().await;
        fixture
            .upstream
            .push(RawConfig::error(key(), ErrorCode::Upstream, "no such config"));

        match rx.await.unwrap() {
            ConfigReply::Error { code, .. } => assert_eq!(code, ErrorCode::Upstream),
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(fixture.cache.get(&key()).is_none());
        fixture.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_cached_when_ttl_configured() {
        let mut timing = TimingValues::proxy_defaults();
        timing.configured_error_timeout_ms = 1000;
        let fixture = start(timing);

        tokio::task::yield_now().await;
        fixture
            .upstream
            .push(RawConfig::error(key(), ErrorCode::Upstream, "no such config"));
        tokio::task::yield_now().await;
        assert!(fixture.cache.get(&key()).unwrap().is_error());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert!(fixture.cache.get(&key()).is_none());
        fixture.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_gate_stops_deliveries() {
        let fixture = start(TimingValues::proxy_defaults());
        tokio::task::yield_now().await;
        fixture.upstream.push(RawConfig::new(key(), 1, "c1", "one"));
        tokio::task::yield_now().await;
        assert_eq!(fixture.cache.get(&key()).unwrap().generation, 1);

        let (request, mut rx) = ConfigRequest::new(key(), 1, "c1", Duration::from_secs(60));
        fixture.registry.register(request);
        fixture.gate.close();
        fixture.cache.clear();

        // Still subscribed: the push arrives but must not land anywhere.
        assert_eq!(fixture.upstream.push(RawConfig::new(key(), 2, "c2", "two")), 1);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(fixture.cache.get(&key()).is_none());
        assert_eq!(fixture.registry.waiters_for(&key()), 1);
        assert!(rx.try_recv().is_err());
    }
}
