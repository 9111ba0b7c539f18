//! Test helpers: an in-memory network that counts calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use http::{HeaderMap, StatusCode};
use swcache_net::{Fetcher, NetError, Request, Response};
use url::Url;

pub(crate) fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
}

pub(crate) fn ok_response(body: &'static str) -> Response {
    Response::new(
        Url::parse("https://example.com/").unwrap(),
        StatusCode::OK,
        HeaderMap::new(),
        body,
    )
}

/// Serves canned bodies by URL. Unknown URLs get a 404; URLs marked as down
/// fail with a network error.
#[derive(Default)]
pub(crate) struct MockNetwork {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    down: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Network answering every default asset under `origin`.
    pub(crate) fn with_assets(origin: &str) -> Self {
        let network = Self::new();
        for path in swcache_core::DEFAULT_ASSETS {
            network.route(&format!("{origin}{}", path.trim_start_matches('/')), 200, path);
        }
        network
    }

    pub(crate) fn route(&self, url: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap();
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, Bytes::from(body.to_string())));
    }

    pub(crate) fn take_down(&self, url: &str) {
        self.down.lock().unwrap().insert(url.to_string());
    }

    pub(crate) fn bring_up(&self, url: &str) {
        self.down.lock().unwrap().remove(url);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = request.url.to_string();
        self.log.lock().unwrap().push(url.clone());

        if self.down.lock().unwrap().contains(&url) {
            return Err(NetError::RequestFailed(format!("connection reset: {url}")));
        }

        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, Bytes::new()));

        Ok(Response::new(request.url.clone(), status, HeaderMap::new(), body))
    }
}
