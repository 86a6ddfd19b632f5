//! Periodic timeout of parked requests.
//!
//! A parked request is answered on timeout no later than its own timeout plus
//! one sweep interval: there is no per-request timer, only this sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::cache::MemoryCache;
use crate::config::SweeperConfig;
use crate::delayed::registry::{DelayedResponse, DelayedResponseRegistry};
use crate::observability::metrics;
use crate::protocol::{ErrorCode, RawConfig};

pub struct DelayedResponseSweeper {
    registry: Arc<DelayedResponseRegistry>,
    cache: Arc<MemoryCache>,
    initial_delay: Duration,
    interval: Duration,
}

impl DelayedResponseSweeper {
    pub fn new(
        registry: Arc<DelayedResponseRegistry>,
        cache: Arc<MemoryCache>,
        config: &SweeperConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            interval: Duration::from_millis(config.interval_ms),
        }
    }

    /// Sweep at a fixed rate until shutdown. One task, so sweeps never overlap.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "Delayed response sweeper starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Delayed response sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Answer every request timed out at `now`. Returns how many were answered.
    pub fn sweep(&self, now: Instant) -> usize {
        let timed_out = self.registry.take_timed_out(now);
        if timed_out.is_empty() {
            return 0;
        }

        let answered = timed_out
            .into_iter()
            .map(|waiter| {
                let answer = self.fallback_answer(&waiter);
                waiter.respond(&answer)
            })
            .filter(|sent| *sent)
            .count();

        metrics::record_sweeper_timeouts(answered);
        tracing::debug!(answered, "Answered timed out delayed responses");
        answered
    }

    /// Cached value, else what the client already holds, else a timeout error.
    fn fallback_answer(&self, waiter: &DelayedResponse) -> RawConfig {
        let request = waiter.request();
        if let Some(cached) = self.cache.get(request.key()).filter(|c| !c.is_error()) {
            return cached;
        }
        match request.held_config() {
            Some(held) => held,
            None => {
                tracing::warn!(
                    key = %request.key(),
                    timeout_ms = request.timeout().as_millis() as u64,
                    "Timed out waiting for config, nothing cached to return"
                );
                RawConfig::error(
                    request.key().clone(),
                    ErrorCode::Timeout,
                    format!("Timed out waiting for config {}", request.key()),
                )
            }
        }
    }
}
