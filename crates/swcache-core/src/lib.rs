//! # swcache core
//!
//! Shared plumbing for the static asset cache worker:
//!
//! - [`WorkerConfig`]: origin, cache name, and asset manifest settings
//! - [`CoreError`]: configuration and IO errors
//! - [`init_logging`]: `tracing-subscriber` setup

pub mod config;
pub mod error;
pub mod logging;

pub use config::{WorkerConfig, DEFAULT_ASSETS, DEFAULT_CACHE_NAME};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LogConfig, LogFormat};
