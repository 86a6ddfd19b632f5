//! Configuration topic identity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a request key is rejected before it reaches the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Definition name is empty")]
    EmptyDefName,

    #[error("Illegal definition name '{0}'")]
    IllegalDefName(String),

    #[error("Illegal definition namespace '{0}'")]
    IllegalDefNamespace(String),

    #[error("Illegal definition checksum '{0}'")]
    IllegalDefMd5(String),
}

/// Identifies one configuration topic a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    pub def_name: String,
    pub def_namespace: String,
    pub def_md5: String,
    pub config_id: String,
}

impl ConfigKey {
    pub fn new(
        def_name: impl Into<String>,
        def_namespace: impl Into<String>,
        def_md5: impl Into<String>,
        config_id: impl Into<String>,
    ) -> Self {
        Self {
            def_name: def_name.into(),
            def_namespace: def_namespace.into(),
            def_md5: def_md5.into(),
            config_id: config_id.into(),
        }
    }

    /// Check that the definition part of the key is well formed.
    ///
    /// Names are `[a-zA-Z][a-zA-Z0-9_]*`, namespaces are dot-separated names,
    /// and the definition checksum is empty or hex. The config id is free-form.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.def_name.is_empty() {
            return Err(RequestError::EmptyDefName);
        }
        if !is_identifier(&self.def_name) {
            return Err(RequestError::IllegalDefName(self.def_name.clone()));
        }
        if !self.def_namespace.is_empty() && !self.def_namespace.split('.').all(is_identifier) {
            return Err(RequestError::IllegalDefNamespace(self.def_namespace.clone()));
        }
        if !self.def_md5.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RequestError::IllegalDefMd5(self.def_md5.clone()));
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.def_namespace.is_empty() {
            write!(f, "{},{}", self.def_name, self.config_id)
        } else {
            write!(f, "{}.{},{}", self.def_namespace, self.def_name, self.config_id)
        }
    }
}
