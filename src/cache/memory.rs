//! In-memory config cache with dump and preload.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::protocol::{ConfigKey, RawConfig};

/// Errors from writing or reading a cache dump.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache dump IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache dump format error: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    config: RawConfig,
    /// Only error sentinels expire.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Latest known config per key.
///
/// Backed by a sharded `DashMap`, so writers for one key never block readers or
/// writers of keys in other shards, and no operation here awaits I/O.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<ConfigKey, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently stored config for `key`, if any and not expired.
    pub fn get(&self, key: &ConfigKey) -> Option<RawConfig> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.config.clone());
            }
        } else {
            return None;
        }
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            metrics::record_cache_size(self.entries.len());
        }
        None
    }

    /// Store `config` if it is newer than what is cached.
    ///
    /// Replaces an existing entry only on a strictly newer generation, or on an
    /// equal generation with a different checksum (a same-generation content fix,
    /// logged as anomalous). Error sentinels are refused here; see
    /// [`MemoryCache::update_error`]. Returns true if the cache changed.
    pub fn update(&self, config: RawConfig) -> bool {
        if config.is_error() {
            tracing::warn!(key = %config.key, "Refusing to cache error config");
            return false;
        }

        let changed = match self.entries.entry(config.key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry { config, expires_at: None });
                true
            }
            Entry::Occupied(mut occupied) => {
                let existing = &occupied.get().config;
                if existing.is_error() || config.generation > existing.generation {
                    occupied.insert(CacheEntry { config, expires_at: None });
                    true
                } else if config.generation == existing.generation
                    && config.checksum != existing.checksum
                {
                    tracing::warn!(
                        key = %config.key,
                        generation = config.generation,
                        old_checksum = %existing.checksum,
                        new_checksum = %config.checksum,
                        "Config content changed without a new generation"
                    );
                    occupied.insert(CacheEntry { config, expires_at: None });
                    true
                } else {
                    false
                }
            }
        };

        if changed {
            metrics::record_cache_size(self.entries.len());
        }
        changed
    }

    /// Cache an error sentinel for `ttl`.
    ///
    /// Never replaces a good config, only an absent entry or another error.
    pub fn update_error(&self, config: RawConfig, ttl: Duration) -> bool {
        let expires_at = Some(Instant::now() + ttl);
        match self.entries.entry(config.key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry { config, expires_at });
            }
            Entry::Occupied(mut occupied) => {
                if !occupied.get().config.is_error() {
                    return false;
                }
                occupied.insert(CacheEntry { config, expires_at });
            }
        }
        metrics::record_cache_size(self.entries.len());
        true
    }

    /// Remove every entry. Parked requests are not notified.
    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_cache_size(0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All live, non-error configs, ordered by key.
    pub fn snapshot(&self) -> Vec<RawConfig> {
        let now = Instant::now();
        let mut configs: Vec<RawConfig> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && !entry.config.is_error())
            .map(|entry| entry.config.clone())
            .collect();
        configs.sort_by(|a, b| a.key.cmp(&b.key));
        configs
    }

    /// Write all cached configs to `path` as JSON. Returns the number written.
    pub fn dump_to_file(&self, path: &Path) -> Result<usize, CacheError> {
        let configs = self.snapshot();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &configs)?;
        tracing::info!(path = ?path, entries = configs.len(), "Dumped config cache");
        Ok(configs.len())
    }

    /// Load configs from a dump written by [`MemoryCache::dump_to_file`].
    ///
    /// Entries go through [`MemoryCache::update`], so newer cached data wins.
    pub fn load_from_file(&self, path: &Path) -> Result<usize, CacheError> {
        let reader = BufReader::new(File::open(path)?);
        let configs: Vec<RawConfig> = serde_json::from_reader(reader)?;
        let loaded = configs
            .into_iter()
            .map(|config| self.update(config))
            .filter(|stored| *stored)
            .count();
        tracing::info!(path = ?path, entries = loaded, "Loaded config cache");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    fn key(id: &str) -> ConfigKey {
        ConfigKey::new("sentinel", "cloud.config", "", id)
    }

    #[test]
    fn test_insert_and_get() {
        let cache = MemoryCache::new();
        assert!(cache.get(&key("a")).is_none());

        assert!(cache.update(RawConfig::new(key("a"), 1, "c1", "one")));
        assert_eq!(cache.get(&key("a")).unwrap().payload, "one");
        assert!(cache.get(&key("b")).is_none());
    }

    #[test]
    fn test_older_generation_is_ignored() {
        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 5, "c5", "five"));

        assert!(!cache.update(RawConfig::new(key("a"), 4, "c4", "four")));
        assert!(!cache.update(RawConfig::new(key("a"), 5, "c5", "five")));
        assert_eq!(cache.get(&key("a")).unwrap().generation, 5);

        assert!(cache.update(RawConfig::new(key("a"), 6, "c6", "six")));
        assert_eq!(cache.get(&key("a")).unwrap().generation, 6);
    }

    #[test]
    fn test_same_generation_content_fix() {
        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 5, "c5", "five"));

        assert!(cache.update(RawConfig::new(key("a"), 5, "c5-fixed", "five, fixed")));
        let cached = cache.get(&key("a")).unwrap();
        assert_eq!(cached.checksum, "c5-fixed");
    }

    #[test]
    fn test_errors_are_not_cached_by_update() {
        let cache = MemoryCache::new();
        assert!(!cache.update(RawConfig::error(key("a"), ErrorCode::Upstream, "boom")));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_entries_expire() {
        let cache = MemoryCache::new();
        let error = RawConfig::error(key("a"), ErrorCode::Upstream, "boom");
        assert!(cache.update_error(error, Duration::from_millis(500)));
        assert!(cache.get(&key("a")).unwrap().is_error());

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
    }

    /// Records the last value set on the cache size gauge.
    #[derive(Default)]
    struct CacheSizeGauge(std::sync::Mutex<Option<f64>>);

    impl ::metrics::GaugeFn for CacheSizeGauge {
        fn increment(&self, _value: f64) {}
        fn decrement(&self, _value: f64) {}
        fn set(&self, value: f64) {
            *self.0.lock().unwrap() = Some(value);
        }
    }

    struct CacheSizeRecorder(std::sync::Arc<CacheSizeGauge>);

    impl ::metrics::Recorder for CacheSizeRecorder {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            ::metrics::Counter::noop()
        }

        fn register_gauge(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            if key.name() == "config_proxy_cache_entries" {
                ::metrics::Gauge::from_arc(self.0.clone())
            } else {
                ::metrics::Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_updates_size_gauge() {
        let gauge = std::sync::Arc::new(CacheSizeGauge::default());
        let recorder = CacheSizeRecorder(gauge.clone());
        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 1, "c1", "one"));
        let error = RawConfig::error(key("b"), ErrorCode::Upstream, "boom");

        ::metrics::with_local_recorder(&recorder, || cache.update_error(error, Duration::from_millis(500)));
        assert_eq!(*gauge.0.lock().unwrap(), Some(2.0));

        tokio::time::advance(Duration::from_millis(501)).await;
        ::metrics::with_local_recorder(&recorder, || assert!(cache.get(&key("b")).is_none()));
        assert_eq!(*gauge.0.lock().unwrap(), Some(1.0));
    }

    #[test]
    fn test_error_never_replaces_good_config() {
        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 2, "c2", "two"));
        let error = RawConfig::error(key("a"), ErrorCode::Upstream, "boom");
        assert!(!cache.update_error(error, Duration::from_secs(10)));
        assert!(!cache.get(&key("a")).unwrap().is_error());
    }

    #[test]
    fn test_good_config_replaces_error() {
        let cache = MemoryCache::new();
        let error = RawConfig::error(key("a"), ErrorCode::Upstream, "boom");
        cache.update_error(error, Duration::from_secs(10));
        assert!(cache.update(RawConfig::new(key("a"), 1, "c1", "one")));
        assert!(!cache.get(&key("a")).unwrap().is_error());
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 1, "c1", "one"));
        cache.update(RawConfig::new(key("b"), 1, "c1", "one"));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dump_and_load() {
        let path = std::env::temp_dir().join(format!("config-proxy-dump-{}.json", std::process::id()));

        let cache = MemoryCache::new();
        cache.update(RawConfig::new(key("a"), 3, "c3", "three"));
        cache.update(RawConfig::new(key("b"), 7, "c7", "seven"));
        assert_eq!(cache.dump_to_file(&path).unwrap(), 2);

        let loaded = MemoryCache::new();
        assert_eq!(loaded.load_from_file(&path).unwrap(), 2);
        assert_eq!(loaded.get(&key("b")).unwrap().payload, "seven");
        assert_eq!(loaded.snapshot(), cache.snapshot());

        std::fs::remove_file(&path).unwrap_or_default();
    }
}
