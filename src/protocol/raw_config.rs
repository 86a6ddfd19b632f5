//! Versioned configuration payloads.

use serde::{Deserialize, Serialize};

use crate::protocol::key::ConfigKey;

/// Error codes carried by error sentinels and error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request named a malformed definition.
    IllegalDefinition,
    /// Cache-only mode and nothing cached for the key.
    NotInCache,
    /// Long poll timed out and there is no config to fall back on.
    Timeout,
    /// The upstream source reported an error for the key.
    Upstream,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::IllegalDefinition => "illegal_definition",
            ErrorCode::NotInCache => "not_in_cache",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Upstream => "upstream",
        };
        f.write_str(s)
    }
}

/// Error details of an error sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFault {
    pub code: ErrorCode,
    pub message: String,
}

/// A concrete, versioned configuration payload for one key.
///
/// For a fixed key two instances with equal generation carry equal checksum and
/// payload; the generation is the authoritative version. A `RawConfig` with
/// `error` set is a sentinel with no payload and must not be cached persistently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConfig {
    pub key: ConfigKey,
    pub generation: u64,
    pub checksum: String,
    /// Opaque payload, passed through untouched.
    #[serde(default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConfigFault>,
}

impl RawConfig {
    pub fn new(
        key: ConfigKey,
        generation: u64,
        checksum: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            key,
            generation,
            checksum: checksum.into(),
            payload: payload.into(),
            error: None,
        }
    }

    /// Build an error sentinel for `key`.
    pub fn error(key: ConfigKey, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            key,
            generation: 0,
            checksum: String::new(),
            payload: String::new(),
            error: Some(ConfigFault {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// True if a client holding `generation`/`checksum` would see something new.
    pub fn differs_from(&self, generation: u64, checksum: &str) -> bool {
        self.generation != generation || self.checksum != checksum
    }
}
