//! Config source subsystem: where answers come from.
//!
//! # Data Flow
//! ```text
//! ProxyServer::resolve_config(request)
//!     → ConfigSourceClient::get_config(cached, request)
//!         RpcConfigSourceClient:
//!             cached differs from client → answer now
//!             else → registry.register + one UpstreamSubscriber per key
//!         MemoryCacheConfigClient:
//!             cached → answer now, else NotInCache error
//!
//! UpstreamSubscriber (one task per subscribed key)
//!     → UpstreamSource::subscribe(key, from_generation)   (http.rs / channel.rs)
//!     → cache.update → registry.resolve_all
//!     → on failure: backoff, resubscribe; SourcePool fails over
//! ```
//!
//! # Design Decisions
//! - `get_config` never awaits: it answers from memory or parks the request
//! - Upstream errors never cross `get_config`, they become retry state
//! - N waiters on a key share one upstream subscription

pub mod channel;
pub mod http;
pub mod memory_client;
pub mod pool;
pub mod rpc_client;
pub mod subscriber;
pub mod upstream;

pub use channel::ChannelUpstream;
pub use http::{HttpSourceConnector, HttpUpstream};
pub use memory_client::MemoryCacheConfigClient;
pub use pool::{SourceConnection, SourceError, SourcePool, SourceSet};
pub use rpc_client::RpcConfigSourceClient;
pub use subscriber::{DeliveryGate, UpstreamSubscriber};
pub use upstream::{ConfigStream, UpstreamConnector, UpstreamError, UpstreamSource};

use crate::protocol::{ConfigRequest, RawConfig};

/// Answers config requests for one proxy mode.
pub trait ConfigSourceClient: Send + Sync {
    /// Answer `request` now, or park it and return `None`.
    ///
    /// `cached` is the cache entry for the request's key at the time of the call.
    fn get_config(&self, cached: Option<RawConfig>, request: &ConfigRequest) -> Option<RawConfig>;

    /// Abort all upstream activity. The client is about to be discarded.
    fn cancel(&self);

    fn shutdown_source_connections(&self);

    fn active_source_connection(&self) -> String;

    fn source_connections(&self) -> Vec<String>;
}
