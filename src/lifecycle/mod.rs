//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (ProxyServer::start):
//!     sweeper task → front door listener → admin listener
//!
//! Shutdown (shutdown.rs):
//!     ProxyServer::stop → trigger → tasks exit their select loops
//!     → listeners stop accepting → flush
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main calls ProxyServer::stop
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop sweeping, stop accepting, then flush
//! - Shutdown has a bounded wait on background tasks

pub mod shutdown;
pub mod signals;

pub use shutdown::{signalled, Shutdown};
pub use signals::wait_for_signal;
