//! Event dispatcher that drives a worker through its lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use swcache_core::WorkerConfig;
use swcache_net::{Fetcher, LoaderConfig, Request, ResourceLoader, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, MatchOptions};
use crate::lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, WorkerState};
use crate::persist::CacheSnapshot;
use crate::worker::{
    ActivateEvent, AssetManifest, FetchEvent, InstallEvent, StaticAssetCache, WorkerHandlers,
    WorkerScope,
};
use crate::{Result, ServiceWorkerError};

/// Events broadcast by the host.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A worker version changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: WorkerState,
    },
    /// Install failed; the version is redundant.
    InstallFailed {
        worker_id: ServiceWorkerId,
        error: String,
    },
    /// A new version now handles fetches.
    ControllerChange { worker_id: ServiceWorkerId },
}

/// Hosts one registration: dispatches install, activate, and fetch events to
/// the handlers and routes uncontrolled requests straight to the network.
pub struct ServiceWorkerHost {
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
    scope: WorkerScope,
    handlers: Arc<dyn WorkerHandlers>,
    snapshot_path: Option<PathBuf>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl ServiceWorkerHost {
    /// Create a host with empty cache storage.
    pub fn new(
        scope_url: Url,
        handlers: Arc<dyn WorkerHandlers>,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        Self::with_caches(scope_url, handlers, network, CacheStorage::new())
    }

    /// Create a host over existing cache storage.
    pub fn with_caches(
        scope_url: Url,
        handlers: Arc<dyn WorkerHandlers>,
        network: Arc<dyn Fetcher>,
        caches: CacheStorage,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let scope = WorkerScope::new(Arc::new(RwLock::new(caches)), network);

        (
            Self {
                registration: Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope_url))),
                scope,
                handlers,
                snapshot_path: None,
                event_tx,
            },
            event_rx,
        )
    }

    /// Build a static asset cache host from configuration. When persistence
    /// is enabled, an existing snapshot is loaded into the cache storage.
    pub async fn from_config(
        config: &WorkerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>)> {
        config.validate()?;
        let origin = config.origin_url()?;

        let loader = ResourceLoader::new(LoaderConfig {
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout(),
            max_redirects: config.max_redirects,
        })?;
        let handlers = StaticAssetCache::new(
            config.cache_name.clone(),
            AssetManifest::from_paths(&origin, config.assets.as_slice())?,
        );

        let snapshot_path = config.persist_caches.then(|| config.snapshot_path());
        let caches = match snapshot_path {
            Some(ref path) => load_snapshot(path).await?,
            None => CacheStorage::new(),
        };

        let (mut host, rx) =
            Self::with_caches(origin, Arc::new(handlers), Arc::new(loader), caches);
        host.snapshot_path = snapshot_path;
        Ok((host, rx))
    }

    /// Write the cache storage to `path` after every successful install.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Shared cache storage.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(self.scope.caches())
    }

    /// State of the active worker, if any.
    pub async fn active_state(&self) -> Option<WorkerState> {
        self.registration.read().await.active.as_ref().map(|w| w.state)
    }

    /// Whether an activated worker handles fetches.
    pub async fn is_controlled(&self) -> bool {
        self.registration.read().await.controller().is_some()
    }

    /// Install a new worker version. The version only reaches `installed`
    /// once the install handler has settled successfully.
    pub async fn install(&self) -> Result<ServiceWorkerId> {
        let worker_id = self.registration.write().await.begin_install()?;
        self.emit_state(worker_id, WorkerState::Installing);

        let event = InstallEvent { worker_id };
        match self.handlers.on_install(&self.scope, &event).await {
            Ok(()) => {
                let displaced = self.registration.write().await.install_complete()?;
                self.emit_state(worker_id, WorkerState::Installed);
                self.emit_retired(displaced);
                info!(worker = %worker_id, "Service worker installed");
                self.persist().await;
                Ok(worker_id)
            }
            Err(err) => {
                error!(worker = %worker_id, error = %err, "Service worker install failed");
                self.registration
                    .write()
                    .await
                    .install_failed(err.to_string())?;
                self.emit_state(worker_id, WorkerState::Redundant);
                let _ = self.event_tx.send(HostEvent::InstallFailed {
                    worker_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Promote the waiting version to active.
    pub async fn activate(&self) -> Result<ServiceWorkerId> {
        let worker_id = self.registration.write().await.begin_activate()?;
        self.emit_state(worker_id, WorkerState::Activating);

        let event = ActivateEvent { worker_id };
        if let Err(err) = self.handlers.on_activate(&self.scope, &event).await {
            error!(worker = %worker_id, error = %err, "Service worker activation failed");
            self.registration
                .write()
                .await
                .activate_failed(err.to_string())?;
            self.emit_state(worker_id, WorkerState::Redundant);
            return Err(err);
        }

        let displaced = self.registration.write().await.activate_complete()?;
        self.emit_state(worker_id, WorkerState::Activated);
        self.emit_retired(displaced);
        let _ = self.event_tx.send(HostEvent::ControllerChange { worker_id });
        info!(worker = %worker_id, "Service worker activated");
        Ok(worker_id)
    }

    /// Install, then activate.
    pub async fn start(&self) -> Result<ServiceWorkerId> {
        self.install().await?;
        self.activate().await
    }

    /// Handle a request from a page. Controlled requests go through the
    /// active worker's fetch handler; uncontrolled ones go to the network.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let controller = self.registration.read().await.controller().map(|w| w.id);
        match controller {
            Some(worker_id) => {
                let event = FetchEvent { worker_id, request };
                self.handlers.on_fetch(&self.scope, event).await
            }
            None => {
                debug!(url = %request.url, "Uncontrolled request, using network");
                self.scope.fetch(&request).await
            }
        }
    }

    /// Whether `request` would be answered from cache.
    pub async fn is_cached(&self, request: &Request) -> bool {
        self.scope
            .caches()
            .read()
            .await
            .match_request(request, &MatchOptions::default())
            .is_some()
    }

    /// Write the cache storage snapshot, if persistence is configured.
    pub async fn save_caches(&self) -> Result<()> {
        let Some(ref path) = self.snapshot_path else {
            return Err(ServiceWorkerError::Persistence(
                "no snapshot path configured".into(),
            ));
        };
        let json = CacheSnapshot::capture(&*self.scope.caches().read().await).to_json()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        debug!(path = %path.display(), "Saved cache snapshot");
        Ok(())
    }

    async fn persist(&self) {
        if self.snapshot_path.is_none() {
            return;
        }
        if let Err(err) = self.save_caches().await {
            warn!(error = %err, "Failed to save cache snapshot");
        }
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: WorkerState) {
        let _ = self.event_tx.send(HostEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    fn emit_retired(&self, displaced: Option<ServiceWorker>) {
        if let Some(worker) = displaced {
            debug!(worker = %worker.id, "Service worker replaced");
            self.emit_state(worker.id, worker.state);
        }
    }
}

async fn load_snapshot(path: &std::path::Path) -> Result<CacheStorage> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(CacheStorage::new()),
        Err(err) => return Err(ServiceWorkerError::Persistence(err.to_string())),
    };

    match CacheSnapshot::from_json(&raw).and_then(CacheSnapshot::restore) {
        Ok(storage) => {
            info!(
                path = %path.display(),
                caches = storage.keys().len(),
                "Loaded cache snapshot"
            );
            Ok(storage)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Discarding unreadable cache snapshot");
            Ok(CacheStorage::new())
        }
    }
}
