//! Protocol value types shared by every subsystem.
//!
//! # Data Flow
//! ```text
//! wire request (http/request.rs)
//!     → ConfigRequest { key: ConfigKey, generation, checksum, timeout, responder }
//!     → ProxyServer::resolve_config
//!     → RawConfig (immediate answer) or parked DelayedResponse
//!     → ConfigReply { changed | unchanged | error }
//!     → Responder (exactly one reply per request)
//! ```
//!
//! # Design Decisions
//! - `ConfigKey` is a plain value: equality and hashing cover all four fields
//! - Generation is the authoritative version id; the checksum detects content fixes
//! - Errors travel as `RawConfig` values so `get_config` stays infallible

pub mod key;
pub mod raw_config;
pub mod reply;
pub mod request;

pub use key::{ConfigKey, RequestError};
pub use raw_config::{ErrorCode, RawConfig};
pub use reply::ConfigReply;
pub use request::{ConfigRequest, RequestId, Responder};
