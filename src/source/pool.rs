//! Upstream source list and failover.
//!
//! # Responsibilities
//! - Parse source specs (`tcp/host:port` or `http(s)://` URLs)
//! - Track per-source health
//! - Keep one active source, rotating round-robin past failed ones

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors for an unusable source list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("No config sources given")]
    Empty,

    #[error("Invalid config source '{spec}': {reason}")]
    Invalid { spec: String, reason: String },
}

/// A validated, ordered list of upstream config sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    specs: Vec<String>,
    urls: Vec<Url>,
}

impl SourceSet {
    pub fn parse<I, S>(sources: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut specs = Vec::new();
        let mut urls = Vec::new();
        for source in sources {
            let spec = source.as_ref().trim();
            if spec.is_empty() {
                continue;
            }
            urls.push(parse_spec(spec)?);
            specs.push(spec.to_string());
        }
        if specs.is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(Self { specs, urls })
    }

    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl std::fmt::Display for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.specs.join(","))
    }
}

fn parse_spec(spec: &str) -> Result<Url, SourceError> {
    let invalid = |reason: String| SourceError::Invalid {
        spec: spec.to_string(),
        reason,
    };

    let url = match spec.strip_prefix("tcp/") {
        Some(host_port) => Url::parse(&format!("http://{}", host_port)),
        None => Url::parse(spec),
    }
    .map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// One upstream source and its health.
#[derive(Debug)]
pub struct SourceConnection {
    pub spec: String,
    pub url: Url,
    healthy: AtomicBool,
    consecutive_failures: AtomicUsize,
}

impl SourceConnection {
    fn new(spec: String, url: Url) -> Self {
        Self {
            spec,
            url,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicUsize::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Connections for a [`SourceSet`] with one active source.
#[derive(Debug)]
pub struct SourcePool {
    connections: Vec<Arc<SourceConnection>>,
    active: AtomicUsize,
}

impl SourcePool {
    pub fn new(sources: &SourceSet) -> Self {
        let connections = sources
            .specs()
            .iter()
            .zip(sources.urls())
            .map(|(spec, url)| Arc::new(SourceConnection::new(spec.clone(), url.clone())))
            .collect();
        Self {
            connections,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active(&self) -> Arc<SourceConnection> {
        let index = self.active.load(Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    pub fn mark_success(&self, connection: &SourceConnection) {
        connection.consecutive_failures.store(0, Ordering::Relaxed);
        if !connection.healthy.swap(true, Ordering::Relaxed) {
            tracing::info!(source = %connection.spec, "Config source recovered");
        }
    }

    /// Record a failure and, if `connection` is active, fail over to the next
    /// healthy source (or simply the next one if none is healthy).
    pub fn mark_failure(&self, connection: &SourceConnection) {
        connection.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        connection.healthy.store(false, Ordering::Relaxed);

        let len = self.connections.len();
        let current = self.active.load(Ordering::Relaxed) % len;
        if self.connections[current].spec != connection.spec || len == 1 {
            return;
        }

        let next = (1..len)
            .map(|i| (current + i) % len)
            .find(|&i| self.connections[i].is_healthy())
            .unwrap_or((current + 1) % len);

        if self
            .active
            .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                from = %self.connections[current].spec,
                to = %self.connections[next].spec,
                "Failing over to next config source"
            );
        }
    }

    pub fn active_connection(&self) -> String {
        self.active().spec.clone()
    }

    pub fn connections(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.spec.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specs() {
        let set = SourceSet::parse(["tcp/localhost:19070", "http://cfg2:19071/"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.urls()[0].as_str(), "http://localhost:19070/");
        assert_eq!(set.to_string(), "tcp/localhost:19070,http://cfg2:19071/");

        assert_eq!(SourceSet::parse(Vec::<String>::new()), Err(SourceError::Empty));
        assert_eq!(SourceSet::parse(["  "]), Err(SourceError::Empty));
        assert!(matches!(
            SourceSet::parse(["ftp://cfg:21"]),
            Err(SourceError::Invalid { .. })
        ));
        assert!(matches!(
            SourceSet::parse(["not a source"]),
            Err(SourceError::Invalid { .. })
        ));
    }

    #[test]
    fn test_failover_round_robin() {
        let set = SourceSet::parse(["tcp/a:1", "tcp/b:1", "tcp/c:1"]).unwrap();
        let pool = SourcePool::new(&set);
        assert_eq!(pool.active_connection(), "tcp/a:1");

        let a = pool.active();
        pool.mark_failure(&a);
        assert_eq!(pool.active_connection(), "tcp/b:1");

        let b = pool.active();
        pool.mark_failure(&b);
        assert_eq!(pool.active_connection(), "tcp/c:1");

        // All failed: keep rotating.
        let c = pool.active();
        pool.mark_failure(&c);
        assert_eq!(pool.active_connection(), "tcp/a:1");

        pool.mark_success(&pool.active());
        assert!(pool.active().is_healthy());
        assert_eq!(pool.active().consecutive_failures(), 0);
    }

    #[test]
    fn test_failure_of_inactive_source_keeps_active() {
        let set = SourceSet::parse(["tcp/a:1", "tcp/b:1"]).unwrap();
        let pool = SourcePool::new(&set);
        let a = pool.active();
        pool.mark_failure(&a);
        assert_eq!(pool.active_connection(), "tcp/b:1");

        // A late failure report for a is ignored for failover.
        pool.mark_failure(&a);
        assert_eq!(pool.active_connection(), "tcp/b:1");
    }
}
