//! Cache Storage: named caches of request/response pairs.

use hashbrown::HashMap;
use http::{HeaderName, Method, StatusCode};
use swcache_net::{Request, Response};
use tracing::trace;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Options controlling how a request is matched against stored entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Ignore the query string on both sides.
    pub ignore_search: bool,
    /// Match non-GET requests.
    pub ignore_method: bool,
    /// Skip `Vary` header checks.
    pub ignore_vary: bool,
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request the response was stored under.
    pub request: Request,

    /// Captured response.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            cached_at: now_millis(),
        }
    }

    /// Whether this entry answers `request`.
    pub fn matches(&self, request: &Request, options: &MatchOptions) -> bool {
        if !options.ignore_method && request.method != Method::GET {
            return false;
        }
        if normalize(&self.request.url, options.ignore_search)
            != normalize(&request.url, options.ignore_search)
        {
            return false;
        }
        options.ignore_vary || self.vary_matches(request)
    }

    fn vary_matches(&self, request: &Request) -> bool {
        for value in self.response.headers.get_all(http::header::VARY) {
            let Ok(value) = value.to_str() else {
                return false;
            };
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if name == "*" {
                    return false;
                }
                let Ok(name) = HeaderName::try_from(name) else {
                    return false;
                };
                if self.request.headers.get(&name) != request.headers.get(&name) {
                    return false;
                }
            }
        }
        true
    }
}

/// Cache key: the URL without its fragment, optionally without its query.
fn normalize(url: &Url, ignore_search: bool) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    if ignore_search {
        url.set_query(None);
    }
    url.to_string()
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A cache instance.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries grouped by normalized URL. A URL holds several entries only
    /// when their responses vary on request headers.
    entries: HashMap<String, Vec<CacheEntry>>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// First entry matching the request.
    pub fn match_request(&self, request: &Request, options: &MatchOptions) -> Option<&CacheEntry> {
        self.candidates(request, options)
            .find(|entry| entry.matches(request, options))
    }

    /// Every entry matching the request.
    pub fn match_all(&self, request: &Request, options: &MatchOptions) -> Vec<&CacheEntry> {
        self.candidates(request, options)
            .filter(|entry| entry.matches(request, options))
            .collect()
    }

    fn candidates<'a>(
        &'a self,
        request: &Request,
        options: &MatchOptions,
    ) -> Box<dyn Iterator<Item = &'a CacheEntry> + 'a> {
        if options.ignore_search {
            Box::new(self.entries.values().flatten())
        } else {
            let key = normalize(&request.url, false);
            Box::new(self.entries.get(&key).into_iter().flatten())
        }
    }

    /// Store a response, replacing every entry the request already matches.
    pub fn put(&mut self, request: Request, response: Response) -> Result<()> {
        validate_put(&request, &response)?;
        self.insert(CacheEntry::new(request, response));
        Ok(())
    }

    /// Store several responses. Nothing is stored unless every pair is valid.
    pub fn put_all(&mut self, pairs: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &pairs {
            validate_put(request, response)?;
        }
        for (request, response) in pairs {
            self.insert(CacheEntry::new(request, response));
        }
        Ok(())
    }

    /// Insert an entry that has already been validated.
    pub(crate) fn insert(&mut self, entry: CacheEntry) {
        let key = normalize(&entry.request.url, false);
        trace!(cache = %self.name, key = %key, "Storing cache entry");
        let slot = self.entries.entry(key).or_default();
        slot.retain(|existing| !existing.matches(&entry.request, &MatchOptions::default()));
        slot.push(entry);
    }

    /// Delete every entry matching the request.
    pub fn delete(&mut self, request: &Request, options: &MatchOptions) -> bool {
        let mut removed = false;
        self.entries.retain(|_, slot| {
            let before = slot.len();
            slot.retain(|entry| !entry.matches(request, options));
            removed |= slot.len() != before;
            !slot.is_empty()
        });
        removed
    }

    /// Requests of every stored entry.
    pub fn keys(&self) -> Vec<&Request> {
        self.entries
            .values()
            .flatten()
            .map(|entry| &entry.request)
            .collect()
    }

    /// All stored entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_put(request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
        return Err(ServiceWorkerError::InvalidRequest(format!(
            "only GET requests can be cached, got {} {}",
            request.method, request.url
        )));
    }
    if !matches!(request.url.scheme(), "http" | "https") {
        return Err(ServiceWorkerError::InvalidRequest(format!(
            "unsupported scheme: {}",
            request.url
        )));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(ServiceWorkerError::InvalidRequest(format!(
            "partial response for {} cannot be cached",
            request.url
        )));
    }
    if response
        .headers
        .get_all(http::header::VARY)
        .iter()
        .any(|v| v.to_str().map(|s| s.split(',').any(|n| n.trim() == "*")).unwrap_or(false))
    {
        return Err(ServiceWorkerError::InvalidRequest(format!(
            "response for {} varies on *",
            request.url
        )));
    }
    Ok(())
}

/// Cache storage (the `caches` global). Caches are kept in creation order.
#[derive(Debug, Default, Clone)]
pub struct CacheStorage {
    caches: Vec<Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.caches.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[index]
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.caches.len();
        self.caches.retain(|c| c.name != name);
        self.caches.len() != before
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.iter().map(|c| c.name.as_str()).collect()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, request: &Request, options: &MatchOptions) -> Option<&CacheEntry> {
        self.caches
            .iter()
            .find_map(|cache| cache.match_request(request, options))
    }

    pub(crate) fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub(crate) fn push(&mut self, cache: Cache) {
        self.caches.retain(|c| c.name != cache.name);
        self.caches.push(cache);
    }
}
