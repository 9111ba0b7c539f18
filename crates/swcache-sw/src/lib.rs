//! # swcache service worker
//!
//! A cache-first static asset worker, hosted outside a browser.
//!
//! ## Features
//!
//! - **Lifecycle**: explicit install, activate, fetch transitions
//! - **Cache API**: named caches, `open`, `put`, all-or-nothing `add_all`, `match`
//! - **Pre-caching**: a fixed asset manifest fetched on install
//! - **Fetch interception**: cache-first with network fallback
//! - **Persistence**: optional JSON snapshot of the cache storage
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (event dispatcher)
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     ├── WorkerHandlers (StaticAssetCache)
//!     │       ├── on_install
//!     │       ├── on_activate
//!     │       └── on_fetch
//!     │
//!     └── WorkerScope
//!             ├── CacheStorage ── Cache ── Request → Response
//!             └── Fetcher (network)
//! ```

use swcache_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod host;
pub mod lifecycle;
pub mod persist;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage, MatchOptions};
pub use host::{HostEvent, ServiceWorkerHost};
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, WorkerState};
pub use persist::CacheSnapshot;
pub use worker::{
    ActivateEvent, AssetManifest, FetchEvent, InstallEvent, StaticAssetCache, WorkerHandlers,
    WorkerScope,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Fetching asset {url} failed: {source}")]
    AssetFetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Asset {url} returned status {status}")]
    AssetFailed { url: String, status: u16 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("State error: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] swcache_core::CoreError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
