//! Worker configuration

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Name of the cache the worker populates on install.
pub const DEFAULT_CACHE_NAME: &str = "flask-pwa-cache";

/// Assets pre-cached on install, in order.
pub const DEFAULT_ASSETS: [&str; 4] = [
    "/",
    "/static/styles.css",
    "/static/icons/icon-192x192.png",
    "/static/icons/icon-512x512.png",
];

const ENV_ORIGIN: &str = "SWCACHE_ORIGIN";
const ENV_CACHE_NAME: &str = "SWCACHE_CACHE_NAME";

/// Static asset cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the asset paths are resolved against
    pub origin: String,

    /// Cache namespace
    pub cache_name: String,

    /// Asset paths fetched on install
    pub assets: Vec<String>,

    /// User agent string sent with network requests
    pub user_agent: String,

    /// Per-request timeout. `None` leaves requests unbounded.
    pub request_timeout_secs: Option<u64>,

    /// Maximum number of redirects to follow
    pub max_redirects: usize,

    /// Write a cache snapshot to `cache_dir` and reload it on startup
    pub persist_caches: bool,

    /// Directory holding the cache snapshot
    pub cache_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:5000".to_string(),
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            user_agent: format!("swcache/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: None,
            max_redirects: 10,
            persist_caches: false,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("swcache"),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `SWCACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(name) = lookup(ENV_CACHE_NAME) {
            self.cache_name = name;
        }
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> CoreResult<()> {
        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(CoreError::config(format!(
                "origin must be http or https, got {}",
                origin.scheme()
            )));
        }
        if self.cache_name.trim().is_empty() {
            return Err(CoreError::config("cache name is empty"));
        }
        if self.assets.is_empty() {
            return Err(CoreError::config("asset list is empty"));
        }
        Ok(())
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> CoreResult<Url> {
        Ok(Url::parse(&self.origin)?)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Location of the cache snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.json", self.cache_name))
    }
}
