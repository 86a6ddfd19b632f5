//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the config proxy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Initial mode ("default" or "memorycache").
    pub mode: String,

    /// Upstream config sources (`tcp/host:port` or URLs).
    pub sources: Vec<String>,

    /// Front door listener.
    pub listener: ListenerConfig,

    /// Subscription and retry timing.
    pub timing: TimingConfig,

    /// Delayed response sweeper schedule.
    pub sweeper: SweeperConfig,

    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: "default".to_string(),
            sources: vec!["tcp/localhost:19070".to_string()],
            listener: ListenerConfig::default(),
            timing: TimingConfig::default(),
            sweeper: SweeperConfig::default(),
            cache: CacheConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address of the config RPC front door.
    pub rpc_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            rpc_address: "0.0.0.0:19090".to_string(),
        }
    }
}

/// Timing configuration, in milliseconds.
///
/// Defaults are the client defaults scaled by the proxy ratio (0.8).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Retry delay while a subscription has never delivered config.
    pub unconfigured_delay_ms: u64,

    /// Retry delay once a subscription has delivered config.
    pub configured_error_delay_ms: u64,

    /// Upstream long-poll timeout.
    pub subscribe_timeout_ms: u64,

    /// Lifetime of cached errors; negative means errors are never cached.
    pub configured_error_timeout_ms: i64,

    /// Cap on retry delay as a multiple of the base delay.
    pub max_delay_multiplier: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            unconfigured_delay_ms: 800,
            configured_error_delay_ms: 12_000,
            subscribe_timeout_ms: 44_000,
            configured_error_timeout_ms: -1,
            max_delay_multiplier: 10,
        }
    }
}

/// Delayed response sweeper schedule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,

    /// Delay before the first sweep.
    pub initial_delay_ms: u64,

    /// Fixed interval between sweeps; bounds how late a timeout is answered.
    pub interval_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 5_000,
            interval_ms: 1_000,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// JSON cache dump to load at startup.
    pub preload_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:19092".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:19091".to_string(),
        }
    }
}
