//! Timing parameters for upstream subscriptions and error handling.
//!
//! The proxy runs with the client defaults scaled down by [`PROXY_TIMING_RATIO`]
//! so that it always answers (even "unchanged") before the client's own timeout
//! fires and the client retries on its own.

use std::time::Duration;

use crate::config::TimingConfig;
use crate::resilience::backoff::error_backoff;

/// Proxy timeouts as a fraction of the client defaults.
pub const PROXY_TIMING_RATIO: f64 = 0.8;

/// Immutable tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingValues {
    /// Retry delay while a subscription has never delivered config.
    pub unconfigured_delay: Duration,
    /// Retry delay once a subscription has delivered config.
    pub configured_error_delay: Duration,
    /// How long one upstream long poll may wait.
    pub subscribe_timeout: Duration,
    /// Lifetime of a cached error in milliseconds; negative means never cache.
    pub configured_error_timeout_ms: i64,
    /// Cap on the error delay, as a multiple of the base delay.
    pub max_delay_multiplier: u32,
}

impl TimingValues {
    /// Defaults used by config clients.
    pub fn client_defaults() -> Self {
        Self {
            unconfigured_delay: Duration::from_millis(1000),
            configured_error_delay: Duration::from_millis(15000),
            subscribe_timeout: Duration::from_millis(55000),
            configured_error_timeout_ms: -1,
            max_delay_multiplier: 10,
        }
    }

    /// Client defaults scaled by [`PROXY_TIMING_RATIO`], never caching errors.
    pub fn proxy_defaults() -> Self {
        let mut timing = Self::client_defaults().scaled(PROXY_TIMING_RATIO);
        timing.configured_error_timeout_ms = -1;
        timing
    }

    /// Scale the three delays by `ratio`.
    pub fn scaled(&self, ratio: f64) -> Self {
        Self {
            unconfigured_delay: self.unconfigured_delay.mul_f64(ratio),
            configured_error_delay: self.configured_error_delay.mul_f64(ratio),
            subscribe_timeout: self.subscribe_timeout.mul_f64(ratio),
            ..*self
        }
    }

    /// How long an error may stay cached, or `None` if errors are never cached.
    pub fn error_cache_ttl(&self) -> Option<Duration> {
        u64::try_from(self.configured_error_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// Delay before retrying a failed subscription.
    pub fn error_delay(&self, configured: bool, failures: u32) -> Duration {
        let base = if configured {
            self.configured_error_delay
        } else {
            self.unconfigured_delay
        };
        error_backoff(failures, base, self.max_delay_multiplier)
    }
}

impl Default for TimingValues {
    fn default() -> Self {
        Self::proxy_defaults()
    }
}

impl From<&TimingConfig> for TimingValues {
    fn from(config: &TimingConfig) -> Self {
        Self {
            unconfigured_delay: Duration::from_millis(config.unconfigured_delay_ms),
            configured_error_delay: Duration::from_millis(config.configured_error_delay_ms),
            subscribe_timeout: Duration::from_millis(config.subscribe_timeout_ms),
            configured_error_timeout_ms: config.configured_error_timeout_ms,
            max_delay_multiplier: config.max_delay_multiplier,
        }
    }
}
