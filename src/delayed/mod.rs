//! Long-poll waiter subsystem.
//!
//! # Data Flow
//! ```text
//! cache miss / unchanged (source/rpc_client.rs)
//!     → registry.rs (park request under its key)
//!
//! Resolution, exactly one of:
//!     upstream push → registry.resolve_all(key, config)
//!     sweeper.rs tick → registry.take_timed_out(now) → cached value / held config
//!     shutdown → registry.cancel_all() (no reply)
//! ```
//!
//! # Design Decisions
//! - Removal from the registry is the claim: only the remover replies
//! - No per-request timers; one fixed-rate sweep bounds lateness
//! - Timed-out requests get a normal answer, so clients just poll again

pub mod registry;
pub mod sweeper;

pub use registry::{DelayedResponse, DelayedResponseRegistry, Registration};
pub use sweeper::DelayedResponseSweeper;
