//! Worker handlers and the static asset cache.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use swcache_net::{Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStorage, MatchOptions};
use crate::lifecycle::ServiceWorkerId;
use crate::{Result, ServiceWorkerError};

/// Dispatched once per worker version, before it can become active.
#[derive(Debug, Clone)]
pub struct InstallEvent {
    pub worker_id: ServiceWorkerId,
}

/// Dispatched when an installed version takes over.
#[derive(Debug, Clone)]
pub struct ActivateEvent {
    pub worker_id: ServiceWorkerId,
}

/// A request issued by a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub worker_id: ServiceWorkerId,
    pub request: Request,
}

/// What a handler can reach: the cache storage and the network.
#[derive(Clone)]
pub struct WorkerScope {
    caches: Arc<RwLock<CacheStorage>>,
    network: Arc<dyn Fetcher>,
}

impl WorkerScope {
    pub fn new(caches: Arc<RwLock<CacheStorage>>, network: Arc<dyn Fetcher>) -> Self {
        Self { caches, network }
    }

    pub fn caches(&self) -> &Arc<RwLock<CacheStorage>> {
        &self.caches
    }

    /// Plain network fetch, bypassing every cache.
    pub async fn fetch(&self, request: &Request) -> Result<Response> {
        Ok(self.network.fetch(request).await?)
    }

    /// Look the request up across all caches.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.caches
            .read()
            .await
            .match_request(request, &MatchOptions::default())
            .map(|entry| entry.response.clone())
    }

    /// Open (or create) `cache_name`, fetch every request, and store the
    /// responses. Any network error or non-OK response fails the whole batch
    /// and nothing is stored.
    pub async fn add_all(&self, cache_name: &str, requests: Vec<Request>) -> Result<()> {
        self.caches.write().await.open(cache_name);

        let network = &self.network;
        let pairs = try_join_all(requests.into_iter().map(|request| async move {
            let response = network
                .fetch(&request)
                .await
                .map_err(|source| ServiceWorkerError::AssetFetch {
                    url: request.url.to_string(),
                    source,
                })?;
            if !response.ok() {
                return Err(ServiceWorkerError::AssetFailed {
                    url: request.url.to_string(),
                    status: response.status.as_u16(),
                });
            }
            Ok::<_, ServiceWorkerError>((request, response))
        }))
        .await?;

        let count = pairs.len();
        self.caches.write().await.open(cache_name).put_all(pairs)?;
        debug!(cache = %cache_name, count, "Committed assets");
        Ok(())
    }
}

/// Lifecycle callbacks driven by the host.
#[async_trait]
pub trait WorkerHandlers: Send + Sync {
    /// Runs to completion before the version can be installed. An error makes
    /// the version redundant.
    async fn on_install(&self, scope: &WorkerScope, event: &InstallEvent) -> Result<()>;

    async fn on_activate(&self, _scope: &WorkerScope, _event: &ActivateEvent) -> Result<()> {
        Ok(())
    }

    /// Produce the response for a controlled page's request.
    async fn on_fetch(&self, scope: &WorkerScope, event: FetchEvent) -> Result<Response>;
}

/// Ordered list of asset URLs fetched on install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    urls: Vec<Url>,
}

impl AssetManifest {
    pub fn new(urls: Vec<Url>) -> Self {
        Self { urls }
    }

    /// Resolve `paths` against `origin`.
    pub fn from_paths<S: AsRef<str>>(origin: &Url, paths: &[S]) -> Result<Self> {
        let urls = paths
            .iter()
            .map(|path| {
                origin.join(path.as_ref()).map_err(|e| {
                    ServiceWorkerError::InvalidUrl(format!("{}: {e}", path.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { urls })
    }

    /// The four default assets under `origin`.
    pub fn default_for(origin: &Url) -> Result<Self> {
        Self::from_paths(origin, &swcache_core::DEFAULT_ASSETS[..])
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// GET requests for every asset, in manifest order.
    pub fn requests(&self) -> Vec<Request> {
        self.urls.iter().cloned().map(Request::get).collect()
    }
}

/// Pre-caches a fixed manifest on install and serves fetches cache-first.
#[derive(Debug, Clone)]
pub struct StaticAssetCache {
    cache_name: String,
    manifest: AssetManifest,
}

impl StaticAssetCache {
    pub fn new(cache_name: impl Into<String>, manifest: AssetManifest) -> Self {
        Self {
            cache_name: cache_name.into(),
            manifest,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }
}

#[async_trait]
impl WorkerHandlers for StaticAssetCache {
    async fn on_install(&self, scope: &WorkerScope, event: &InstallEvent) -> Result<()> {
        info!(
            worker = %event.worker_id,
            cache = %self.cache_name,
            assets = self.manifest.urls.len(),
            "Service worker installing"
        );
        scope.add_all(&self.cache_name, self.manifest.requests()).await
    }

    async fn on_activate(&self, _scope: &WorkerScope, event: &ActivateEvent) -> Result<()> {
        debug!(worker = %event.worker_id, "Service worker activating");
        Ok(())
    }

    async fn on_fetch(&self, scope: &WorkerScope, event: FetchEvent) -> Result<Response> {
        if let Some(response) = scope.match_request(&event.request).await {
            debug!(url = %event.request.url, "Cache hit");
            return Ok(response);
        }
        debug!(url = %event.request.url, "Cache miss, forwarding to network");
        scope.fetch(&event.request).await
    }
}
