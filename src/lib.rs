//! Config proxy library.
//!
//! Sits between config clients and a config source cluster: answers long polls
//! from an in-memory cache, parks requests until upstream pushes a change or
//! their timeout passes, and keeps one upstream subscription per config key.

pub mod admin;
pub mod cache;
pub mod config;
pub mod delayed;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod server;
pub mod source;
pub mod timing;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use server::{Mode, ProxyServer};
