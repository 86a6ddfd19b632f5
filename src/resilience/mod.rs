//! Retry pacing for upstream subscriptions.
//!
//! A subscriber that loses its upstream stream waits [`backoff::error_backoff`]
//! before resubscribing. The base delay depends on whether the key was ever
//! configured; see [`crate::timing::TimingValues::error_delay`].

pub mod backoff;
