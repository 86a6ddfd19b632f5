//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated)
//!     → ProxyServer::new, TimingValues::from
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates
//!     → main applies changed sources / mode to the running ProxyServer
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only sources and mode are applied live; everything else needs a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, SweeperConfig,
    TimingConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
