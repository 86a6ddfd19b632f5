//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the source list and mode name parse
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::server::Mode;
use crate::source::SourceSet;

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("mode: {0}")]
    Mode(String),

    #[error("sources: {0}")]
    Sources(String),

    #[error("{field}: invalid address '{value}'")]
    Address { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("observability.log_format: expected 'pretty' or 'json', got '{0}'")]
    LogFormat(String),

    #[error("admin.api_key must not be empty when admin is enabled")]
    EmptyApiKey,
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.mode.parse::<Mode>() {
        errors.push(ValidationError::Mode(e.to_string()));
    }
    if let Err(e) = SourceSet::parse(&config.sources) {
        errors.push(ValidationError::Sources(e.to_string()));
    }

    check_address(&mut errors, "listener.rpc_address", &config.listener.rpc_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.timing.subscribe_timeout_ms == 0 {
        errors.push(ValidationError::Zero("timing.subscribe_timeout_ms"));
    }
    if config.sweeper.enabled && config.sweeper.interval_ms == 0 {
        errors.push(ValidationError::Zero("sweeper.interval_ms"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::LogFormat(other.to_string())),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}
