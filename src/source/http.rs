//! HTTP upstream: long-polls another config proxy or config server.
//!
//! # Responsibilities
//! - Poll `POST {source}/config/v1/resolve` with the last seen generation
//! - Yield every changed answer; swallow "unchanged" and poll again
//! - Report transport failures to the source pool, which fails over
//! - Treat "nothing yet" error answers (timeout, not in cache) as an
//!   unavailable upstream, never as a config error
//!
//! # Design Decisions
//! - Same wire format as our own front door, so proxies can be chained
//! - Each long poll asks the source to wait `subscribe_timeout`, which is
//!   shorter than any client timeout by construction
//! - A source that answers "unchanged" before half of `subscribe_timeout` is
//!   not long-polling; the next poll waits the base retry delay

use dashmap::DashMap;
use futures_util::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::http::request::{ResolveRequest, RESOLVE_PATH};
use crate::protocol::{ConfigKey, ConfigReply, ErrorCode, RawConfig};
use crate::source::pool::{SourceConnection, SourcePool, SourceSet};
use crate::source::upstream::{ConfigStream, UpstreamConnector, UpstreamError, UpstreamSource};
use crate::timing::TimingValues;

/// Slack on top of the long-poll timeout before the HTTP call is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(5);

/// Upstream reached over HTTP, with failover across the source list.
pub struct HttpUpstream {
    client: reqwest::Client,
    pool: Arc<SourcePool>,
    timing: TimingValues,
    closed: DashMap<ConfigKey, Arc<AtomicBool>>,
    shut_down: Arc<AtomicBool>,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, sources: &SourceSet, timing: &TimingValues) -> Self {
        Self {
            client,
            pool: Arc::new(SourcePool::new(sources)),
            timing: *timing,
            closed: DashMap::new(),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pool(&self) -> &SourcePool {
        &self.pool
    }
}

struct PollState {
    client: reqwest::Client,
    pool: Arc<SourcePool>,
    key: ConfigKey,
    generation: u64,
    checksum: String,
    timing: TimingValues,
    /// Set once a changed answer arrived.
    configured: bool,
    closed: Arc<AtomicBool>,
    shut_down: Arc<AtomicBool>,
}

impl PollState {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst)
    }

    /// Pause before the next poll when the source answered "unchanged" early.
    async fn pace(&self, started: Instant) {
        if started.elapsed() >= self.timing.subscribe_timeout / 2 {
            return;
        }
        let delay = if self.configured {
            self.timing.configured_error_delay
        } else {
            self.timing.unconfigured_delay
        };
        tracing::debug!(
            key = %self.key,
            delay_ms = delay.as_millis() as u64,
            "Upstream answered unchanged early, pacing next poll"
        );
        tokio::time::sleep(delay).await;
    }

    async fn poll(&self, connection: &SourceConnection) -> Result<ConfigReply, UpstreamError> {
        let address = connection.spec.clone();
        let url = connection
            .url
            .join(RESOLVE_PATH)
            .map_err(|e| UpstreamError::Transport {
                address: address.clone(),
                message: e.to_string(),
            })?;

        let body = ResolveRequest::for_key(
            &self.key,
            self.generation,
            &self.checksum,
            u32::try_from(self.timing.subscribe_timeout.as_millis()).unwrap_or(u32::MAX),
        );

        let response = self
            .client
            .post(url)
            .json(&body)
            .timeout(self.timing.subscribe_timeout + POLL_GRACE)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                address: address.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                address,
                status: status.as_u16(),
            });
        }

        response
            .json::<ConfigReply>()
            .await
            .map_err(|e| UpstreamError::Decode {
                address,
                message: e.to_string(),
            })
    }
}

impl UpstreamSource for HttpUpstream {
    fn subscribe(&self, key: &ConfigKey, from_generation: u64) -> ConfigStream {
        let closed = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.closed.insert(key.clone(), closed.clone()) {
            previous.store(true, Ordering::SeqCst);
        }

        let state = PollState {
            client: self.client.clone(),
            pool: self.pool.clone(),
            key: key.clone(),
            generation: from_generation,
            checksum: String::new(),
            timing: self.timing,
            configured: false,
            closed,
            shut_down: self.shut_down.clone(),
        };

        tracing::debug!(key = %key, from_generation, source = %self.pool.active_connection(), "Subscribing upstream");

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if state.is_closed() {
                    return None;
                }
                let connection = state.pool.active();
                let started = Instant::now();
                match state.poll(&connection).await {
                    Ok(ConfigReply::Changed { generation, checksum, payload }) => {
                        state.pool.mark_success(&connection);
                        state.configured = true;
                        state.generation = generation;
                        state.checksum = checksum.clone();
                        let config = RawConfig::new(state.key.clone(), generation, checksum, payload);
                        return Some((Ok(config), state));
                    }
                    Ok(ConfigReply::Unchanged { .. }) => {
                        state.pool.mark_success(&connection);
                        state.pace(started).await;
                    }
                    Ok(ConfigReply::Error {
                        code: code @ (ErrorCode::Timeout | ErrorCode::NotInCache),
                        message,
                    }) => {
                        // Reachable, but itself still waiting on config for the key.
                        state.pool.mark_success(&connection);
                        let error = UpstreamError::Unavailable {
                            address: connection.spec.clone(),
                            code,
                            message,
                        };
                        return Some((Err(error), state));
                    }
                    Ok(ConfigReply::Error { code, message }) => {
                        state.pool.mark_success(&connection);
                        let config = RawConfig::error(state.key.clone(), code, message);
                        return Some((Ok(config), state));
                    }
                    Err(e) => {
                        state.pool.mark_failure(&connection);
                        return Some((Err(e), state));
                    }
                }
            }
        }))
    }

    fn unsubscribe(&self, key: &ConfigKey) {
        if let Some((_, closed)) = self.closed.remove(key) {
            closed.store(true, Ordering::SeqCst);
        }
    }

    fn active_connection(&self) -> String {
        self.pool.active_connection()
    }

    fn connections(&self) -> Vec<String> {
        self.pool.connections()
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.closed.clear();
    }
}

/// Connects [`HttpUpstream`]s sharing one HTTP client.
#[derive(Clone, Default)]
pub struct HttpSourceConnector {
    client: reqwest::Client,
}

impl HttpSourceConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpstreamConnector for HttpSourceConnector {
    fn connect(&self, sources: &SourceSet, timing: &TimingValues) -> Arc<dyn UpstreamSource> {
        tracing::info!(sources = %sources, "Connecting to config sources");
        Arc::new(HttpUpstream::new(self.client.clone(), sources, timing))
    }
}
