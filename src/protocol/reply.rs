//! Replies sent to config clients.

use serde::{Deserialize, Serialize};

use crate::protocol::raw_config::{ErrorCode, RawConfig};
use crate::protocol::request::ConfigRequest;

/// The answer to one config request, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfigReply {
    /// New generation or content.
    Changed {
        generation: u64,
        checksum: String,
        payload: String,
    },
    /// The client already holds this generation and checksum.
    Unchanged { generation: u64, checksum: String },
    Error { code: ErrorCode, message: String },
}

impl ConfigReply {
    /// Build the reply `answer` makes for `request`.
    pub fn for_request(answer: &RawConfig, request: &ConfigRequest) -> Self {
        if let Some(fault) = &answer.error {
            return ConfigReply::Error {
                code: fault.code,
                message: fault.message.clone(),
            };
        }
        if answer.differs_from(request.generation(), request.checksum()) {
            ConfigReply::Changed {
                generation: answer.generation,
                checksum: answer.checksum.clone(),
                payload: answer.payload.clone(),
            }
        } else {
            ConfigReply::Unchanged {
                generation: answer.generation,
                checksum: answer.checksum.clone(),
            }
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            ConfigReply::Changed { generation, .. } | ConfigReply::Unchanged { generation, .. } => {
                Some(*generation)
            }
            ConfigReply::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConfigReply::Error { .. })
    }
}
