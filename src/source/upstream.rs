//! Upstream config source interface.

use futures_util::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::{ConfigKey, ErrorCode, RawConfig};
use crate::source::pool::SourceSet;
use crate::timing::TimingValues;

/// Failures talking to an upstream source.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Upstream {address} unreachable: {message}")]
    Transport { address: String, message: String },

    #[error("Upstream {address} returned status {status}")]
    Status { address: String, status: u16 },

    #[error("Undecodable reply from upstream {address}: {message}")]
    Decode { address: String, message: String },

    /// The source answered, but had nothing for the key: it is waiting on its own upstream.
    #[error("Upstream {address} has no config yet ({code}): {message}")]
    Unavailable {
        address: String,
        code: ErrorCode,
        message: String,
    },

    #[error("Upstream subscription closed")]
    Closed,
}

/// Stream of configs pushed for one subscribed key.
///
/// Yields every config that differs from what the subscription last saw,
/// starting from `from_generation`. An `Err` item or the end of the stream means
/// the subscription broke and should be re-established after a delay.
pub type ConfigStream = BoxStream<'static, Result<RawConfig, UpstreamError>>;

/// A remote config source cluster.
pub trait UpstreamSource: Send + Sync {
    fn subscribe(&self, key: &ConfigKey, from_generation: u64) -> ConfigStream;

    fn unsubscribe(&self, key: &ConfigKey);

    /// Source currently used for new subscriptions.
    fn active_connection(&self) -> String;

    fn connections(&self) -> Vec<String>;

    /// Close all connections. Outstanding streams end.
    fn shutdown(&self);
}

/// Builds an [`UpstreamSource`] for a source list.
pub trait UpstreamConnector: Send + Sync {
    fn connect(&self, sources: &SourceSet, timing: &TimingValues) -> Arc<dyn UpstreamSource>;
}
