//! Wire format of the resolve call.
//!
//! # Responsibilities
//! - Define the JSON body of `POST /config/v1/resolve`
//! - Convert it into a [`ConfigRequest`] with a request id
//!
//! # Design Decisions
//! - The same type is sent by the HTTP upstream, so proxies chain
//! - Request ids come from the `x-request-id` header when present

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::ConfigKey;

/// Path of the resolve call, relative to a source's base URL.
pub const RESOLVE_PATH: &str = "config/v1/resolve";

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Client timeout used when a request does not give one.
pub const DEFAULT_TIMEOUT_MS: u32 = 55_000;

/// Body of a resolve call: the key plus what the client already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub def_name: String,
    #[serde(default)]
    pub def_namespace: String,
    #[serde(default)]
    pub def_md5: String,
    #[serde(default)]
    pub config_id: String,
    /// Generation the client holds, 0 if none.
    #[serde(default)]
    pub generation: u64,
    /// Checksum of the config the client holds, empty if none.
    #[serde(default)]
    pub checksum: String,
    /// Client timeout. Bodies asking for more than `u32::MAX` ms are rejected.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
}

fn default_timeout_ms() -> u32 {
    DEFAULT_TIMEOUT_MS
}

impl ResolveRequest {
    pub fn for_key(key: &ConfigKey, generation: u64, checksum: &str, timeout_ms: u32) -> Self {
        Self {
            def_name: key.def_name.clone(),
            def_namespace: key.def_namespace.clone(),
            def_md5: key.def_md5.clone(),
            config_id: key.config_id.clone(),
            generation,
            checksum: checksum.to_string(),
            timeout_ms,
        }
    }

    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(
            self.def_name.clone(),
            self.def_namespace.clone(),
            self.def_md5.clone(),
            self.config_id.clone(),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_body_defaults() {
        let body: ResolveRequest =
            serde_json::from_str(r#"{"def_name":"sentinel","config_id":"hosts/foo"}"#).unwrap();
        assert_eq!(body.generation, 0);
        assert!(body.checksum.is_empty());
        assert_eq!(body.timeout(), Duration::from_millis(u64::from(DEFAULT_TIMEOUT_MS)));
        assert_eq!(body.key(), ConfigKey::new("sentinel", "", "", "hosts/foo"));
    }

    #[test]
    fn test_for_key_carries_key_fields() {
        let key = ConfigKey::new("sentinel", "cloud.config", "abc123", "hosts/foo");
        let body = ResolveRequest::for_key(&key, 7, "c7", 1000);
        assert_eq!(body.key(), key);
        assert_eq!(body.generation, 7);
        assert_eq!(body.timeout_ms, 1000);
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let body = format!(
            r#"{{"def_name":"sentinel","config_id":"hosts/foo","timeout_ms":{}}}"#,
            u64::from(u32::MAX) + 1
        );
        assert!(serde_json::from_str::<ResolveRequest>(&body).is_err());

        let body = format!(
            r#"{{"def_name":"sentinel","config_id":"hosts/foo","timeout_ms":{}}}"#,
            u32::MAX
        );
        let request: ResolveRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(request.timeout(), Duration::from_millis(u64::from(u32::MAX)));
    }
}
