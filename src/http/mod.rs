//! HTTP front door subsystem.
//!
//! # Data Flow
//! ```text
//! POST /config/v1/resolve
//!     → server.rs (Axum, request id, tracing)
//!     → request.rs (decode ResolveRequest → ConfigRequest)
//!     → ProxyServer::resolve_config
//!         answered now → reply
//!         parked → await the oneshot (push / sweeper / shutdown)
//!     → JSON ConfigReply
//! ```

pub mod request;
pub mod server;

pub use request::{ResolveRequest, RESOLVE_PATH, X_REQUEST_ID};
pub use server::{AppState, RpcServer};
