//! In-process upstream source fed through [`ChannelUpstream::push`].
//!
//! Used to embed the proxy next to a config producer in the same process, and
//! to drive the proxy deterministically in tests.

use dashmap::DashMap;
use futures_util::stream;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::{ConfigKey, RawConfig};
use crate::source::pool::SourceSet;
use crate::source::upstream::{ConfigStream, UpstreamConnector, UpstreamError, UpstreamSource};
use crate::timing::TimingValues;

const IN_PROCESS: &str = "in-process";

type Subscriber = mpsc::UnboundedSender<Result<RawConfig, UpstreamError>>;

#[derive(Default)]
struct ChannelInner {
    latest: DashMap<ConfigKey, RawConfig>,
    subscribers: DashMap<ConfigKey, Vec<Subscriber>>,
    subscribe_calls: DashMap<ConfigKey, usize>,
}

/// Upstream whose configs are pushed by the embedding code.
///
/// Clones share state; connecting it for any source list returns the same hub.
#[derive(Clone, Default)]
pub struct ChannelUpstream {
    inner: Arc<ChannelInner>,
}

impl ChannelUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `config` to every open subscription on its key.
    /// Returns how many subscriptions received it.
    pub fn push(&self, config: RawConfig) -> usize {
        let mut subscribers = self.inner.subscribers.entry(config.key.clone()).or_default();
        self.inner.latest.insert(config.key.clone(), config.clone());
        subscribers.retain(|tx| tx.send(Ok(config.clone())).is_ok());
        subscribers.len()
    }

    /// Break every subscription on `key` with a transport error.
    pub fn fail(&self, key: &ConfigKey) -> usize {
        let broken = self
            .inner
            .subscribers
            .remove(key)
            .map(|(_, subscribers)| subscribers)
            .unwrap_or_default();
        for tx in &broken {
            let _ = tx.send(Err(UpstreamError::Transport {
                address: IN_PROCESS.to_string(),
                message: "connection reset".to_string(),
            }));
        }
        broken.len()
    }

    /// How many times `key` has been subscribed.
    pub fn subscription_count(&self, key: &ConfigKey) -> usize {
        self.inner.subscribe_calls.get(key).map(|n| *n).unwrap_or(0)
    }

    /// Subscriptions on `key` whose receiving end is still open.
    pub fn open_subscriptions(&self, key: &ConfigKey) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl UpstreamSource for ChannelUpstream {
    fn subscribe(&self, key: &ConfigKey, from_generation: u64) -> ConfigStream {
        *self.inner.subscribe_calls.entry(key.clone()).or_default() += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.inner.subscribers.entry(key.clone()).or_default();
        if let Some(latest) = self.inner.latest.get(key) {
            if latest.generation != from_generation {
                let _ = tx.send(Ok(latest.clone()));
            }
        }
        subscribers.push(tx);
        drop(subscribers);

        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    fn unsubscribe(&self, key: &ConfigKey) {
        self.inner.subscribers.remove(key);
    }

    fn active_connection(&self) -> String {
        IN_PROCESS.to_string()
    }

    fn connections(&self) -> Vec<String> {
        vec![IN_PROCESS.to_string()]
    }

    fn shutdown(&self) {
        self.inner.subscribers.clear();
    }
}

impl UpstreamConnector for ChannelUpstream {
    fn connect(&self, _sources: &SourceSet, _timing: &TimingValues) -> Arc<dyn UpstreamSource> {
        Arc::new(self.clone())
    }
}
