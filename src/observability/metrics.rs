//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_proxy_requests_total` (counter): resolved requests by outcome
//!   (`answered`, `parked`, `rejected`)
//! - `config_proxy_upstream_errors_total` (counter): broken upstream subscriptions
//! - `config_proxy_mode_switches_total` (counter): mode switches by target mode
//! - `config_proxy_sweeper_timeouts_total` (counter): requests answered on timeout
//! - `config_proxy_cache_entries` (gauge): cached configs
//! - `config_proxy_delayed_responses` (gauge): parked requests
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Outcome of one resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Answered,
    Parked,
    Rejected,
}

impl ResolveOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ResolveOutcome::Answered => "answered",
            ResolveOutcome::Parked => "parked",
            ResolveOutcome::Rejected => "rejected",
        }
    }
}

pub fn record_resolve(outcome: ResolveOutcome) {
    metrics::counter!("config_proxy_requests_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_upstream_error() {
    metrics::counter!("config_proxy_upstream_errors_total").increment(1);
}

pub fn record_mode_switch(mode: &str) {
    metrics::counter!("config_proxy_mode_switches_total", "mode" => mode.to_string()).increment(1);
}

pub fn record_sweeper_timeouts(answered: usize) {
    metrics::counter!("config_proxy_sweeper_timeouts_total").increment(answered as u64);
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("config_proxy_cache_entries").set(entries as f64);
}

pub fn record_delayed_responses(parked: usize) {
    metrics::gauge!("config_proxy_delayed_responses").set(parked as f64);
}
