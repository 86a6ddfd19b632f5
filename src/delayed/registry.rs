//! Registry of parked long-poll requests.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::protocol::{ConfigKey, ConfigRequest, RawConfig, RequestId};

/// A request parked until upstream pushes a change or its timeout passes.
#[derive(Debug)]
pub struct DelayedResponse {
    request: ConfigRequest,
    registered_at: Instant,
}

impl DelayedResponse {
    fn new(request: ConfigRequest, registered_at: Instant) -> Self {
        Self { request, registered_at }
    }

    pub fn request(&self) -> &ConfigRequest {
        &self.request
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Instant after which the sweeper answers this request.
    pub fn deadline(&self) -> Instant {
        self.registered_at + self.request.timeout()
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.deadline() <= now
    }

    /// Reply and consume. Returns false if the request was already answered.
    pub fn respond(self, answer: &RawConfig) -> bool {
        self.request.respond(answer)
    }
}

/// Outcome of [`DelayedResponseRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Waiters on the key, including this one.
    pub waiters: usize,
}

/// Outstanding waiters, keyed by config key.
///
/// Every removal happens under the key's shard lock and hands the
/// [`DelayedResponse`] out by value, so whichever of push, sweep or cancel
/// removes a waiter is the only one that can answer it.
#[derive(Debug, Default)]
pub struct DelayedResponseRegistry {
    waiters: DashMap<ConfigKey, Vec<DelayedResponse>>,
    count: AtomicUsize,
}

impl DelayedResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `request` under its key.
    pub fn register(&self, request: ConfigRequest) -> Registration {
        self.register_at(request, Instant::now())
    }

    pub fn register_at(&self, request: ConfigRequest, now: Instant) -> Registration {
        let mut list = self.waiters.entry(request.key().clone()).or_default();
        list.push(DelayedResponse::new(request, now));
        let waiters = list.len();
        // Count before releasing the shard so a concurrent removal never sees it missing.
        let total = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        drop(list);

        metrics::record_delayed_responses(total);
        Registration { waiters }
    }

    /// Remove one parked request, if it is still parked.
    pub fn remove(&self, key: &ConfigKey, id: RequestId) -> Option<DelayedResponse> {
        let mut removed = None;
        self.waiters.remove_if_mut(key, |_, list| {
            if let Some(pos) = list.iter().position(|w| w.request.id() == id) {
                removed = Some(list.remove(pos));
            }
            list.is_empty()
        });
        if removed.is_some() {
            self.subtract(1);
        }
        removed
    }

    /// Remove and return every waiter on `key`, in arrival order.
    pub fn take_all(&self, key: &ConfigKey) -> Vec<DelayedResponse> {
        let taken = self
            .waiters
            .remove(key)
            .map(|(_, list)| list)
            .unwrap_or_default();
        self.subtract(taken.len());
        taken
    }

    /// Answer every waiter on `key` with `answer`. Returns how many were answered.
    pub fn resolve_all(&self, key: &ConfigKey, answer: &RawConfig) -> usize {
        let taken = self.take_all(key);
        if !taken.is_empty() {
            tracing::debug!(
                key = %key,
                waiters = taken.len(),
                generation = answer.generation,
                "Resolving delayed responses"
            );
        }
        taken
            .into_iter()
            .map(|waiter| waiter.respond(answer))
            .filter(|sent| *sent)
            .count()
    }

    /// Remove and return every waiter whose deadline is at or before `now`.
    ///
    /// Within each key the result keeps arrival order.
    pub fn take_timed_out(&self, now: Instant) -> Vec<DelayedResponse> {
        let mut timed_out = Vec::new();
        self.waiters.retain(|_, list| {
            let mut i = 0;
            while i < list.len() {
                if list[i].is_timed_out(now) {
                    timed_out.push(list.remove(i));
                } else {
                    i += 1;
                }
            }
            !list.is_empty()
        });
        self.subtract(timed_out.len());
        timed_out
    }

    /// Drop every waiter on `key` without replying.
    pub fn cancel_all_for(&self, key: &ConfigKey) -> usize {
        self.take_all(key).len()
    }

    /// Drop every waiter without replying. Used at shutdown.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.waiters.retain(|_, list| {
            cancelled += list.len();
            false
        });
        self.subtract(cancelled);
        cancelled
    }

    /// Number of parked requests across all keys.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of parked requests for `key`.
    pub fn waiters_for(&self, key: &ConfigKey) -> usize {
        self.waiters.get(key).map(|list| list.len()).unwrap_or(0)
    }

    fn subtract(&self, n: usize) {
        if n == 0 {
            return;
        }
        let total = self.count.fetch_sub(n, Ordering::SeqCst).saturating_sub(n);
        metrics::record_delayed_responses(total);
    }
}
