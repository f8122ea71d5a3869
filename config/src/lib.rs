//! Layered configuration for the sessionwire services.
//!
//! Sources, later ones winning:
//! 1. Defaults (from code)
//! 2. Config file (`sessionwire.toml`)
//! 3. Environment variables (`SESSIONWIRE_*`, `__` for nesting)
//!
//! # Example
//!
//! ```no_run
//! use sessionwire_config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_file("./sessionwire.toml")
//!     .load()
//!     .expect("Failed to load config");
//! assert!(config.retry.max_attempts >= 1);
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{
    ConfigLoader, QuotaSettings, ReplaySettings, RetrySettings, ServerSettings,
    SessionwireConfig, TransportSettings,
};
