//! Proxy orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! http front door / embedding code
//!     → ProxyServer::resolve_config(request)
//!         → key validation (malformed → error answer, never parked)
//!         → cache.get(key)
//!         → active client snapshot (ArcSwap) → get_config
//!
//! admin API / config reload
//!     → set_mode, update_source_connections (serialized by one lock)
//!         → flush outgoing client, install new one atomically
//! ```
//!
//! # Mode transitions
//! | from → to | cache | upstream client |
//! |---|---|---|
//! | default → memorycache | kept | cancelled, discarded |
//! | memorycache → default | flushed | freshly constructed |
//!
//! # Design Decisions
//! - Requests read one consistent (mode, client) snapshot, never a half-built client
//! - Requests parked before a switch are not force-answered; the sweeper answers them

pub mod mode;
pub mod proxy;

pub use mode::{Mode, ModeError};
pub use proxy::{BoundAddresses, ProxyServer, ProxyStatus, ServerError};
