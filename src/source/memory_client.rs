//! Cache-only client used in memorycache mode.

use std::sync::Arc;

use crate::cache::MemoryCache;
use crate::protocol::{ConfigRequest, ErrorCode, RawConfig};
use crate::source::ConfigSourceClient;

const NO_SOURCE: &str = "N/A";

/// Serves whatever the cache holds. Never parks, never subscribes.
pub struct MemoryCacheConfigClient {
    cache: Arc<MemoryCache>,
}

impl MemoryCacheConfigClient {
    pub fn new(cache: Arc<MemoryCache>) -> Self {
        Self { cache }
    }
}

impl ConfigSourceClient for MemoryCacheConfigClient {
    fn get_config(&self, cached: Option<RawConfig>, request: &ConfigRequest) -> Option<RawConfig> {
        // The caller's snapshot may be stale by a few microseconds; take the freshest.
        let answer = cached.or_else(|| self.cache.get(request.key()));
        match answer {
            Some(config) => Some(config),
            None => {
                tracing::debug!(key = %request.key(), "Config not in cache");
                Some(RawConfig::error(
                    request.key().clone(),
                    ErrorCode::NotInCache,
                    format!("No cached config for {}", request.key()),
                ))
            }
        }
    }

    fn cancel(&self) {}

    fn shutdown_source_connections(&self) {}

    fn active_source_connection(&self) -> String {
        NO_SOURCE.to_string()
    }

    fn source_connections(&self) -> Vec<String> {
        Vec::new()
    }
}
