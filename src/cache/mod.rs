//! Config cache subsystem.
//!
//! # Data Flow
//! ```text
//! upstream push (source/subscriber.rs)
//!     → MemoryCache::update (newer generation or content fix wins)
//!
//! request (server/proxy.rs)
//!     → MemoryCache::get → ConfigSourceClient::get_config
//!
//! mode switch / source update / shutdown
//!     → MemoryCache::clear
//! ```
//!
//! # Design Decisions
//! - One entry per key, replaced whole, never merged
//! - Error sentinels are cached only with an expiry
//! - Dump/preload lets cache-only mode start with data

pub mod memory;

pub use memory::{CacheError, MemoryCache};
