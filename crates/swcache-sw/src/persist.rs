//! JSON snapshot of a [`CacheStorage`], so caches survive restarts.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use swcache_net::{Request, Response};
use tracing::warn;
use url::Url;

use crate::cache::{Cache, CacheEntry, CacheStorage};
use crate::{Result, ServiceWorkerError};

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of a cache storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub caches: Vec<SnapshotCache>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCache {
    pub name: String,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: Vec<(String, String)>,
    pub status: u16,
    pub response_url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body.
    pub body: String,
    pub cached_at: u64,
}

impl CacheSnapshot {
    /// Capture every cache in `storage`.
    pub fn capture(storage: &CacheStorage) -> Self {
        let caches = storage
            .caches()
            .iter()
            .map(|cache| SnapshotCache {
                name: cache.name.clone(),
                entries: cache.entries().map(SnapshotEntry::from_entry).collect(),
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            caches,
        }
    }

    /// Rebuild a storage from the snapshot.
    pub fn restore(self) -> Result<CacheStorage> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ServiceWorkerError::Persistence(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let mut storage = CacheStorage::new();
        for snapshot in self.caches {
            let mut cache = Cache::new(&snapshot.name);
            for entry in snapshot.entries {
                cache.insert(entry.into_entry()?);
            }
            storage.push(cache);
        }
        Ok(storage)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ServiceWorkerError::Persistence(e.to_string()))
    }
}

impl SnapshotEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            method: entry.request.method.to_string(),
            url: entry.request.url.to_string(),
            request_headers: encode_headers(&entry.request.headers),
            status: entry.response.status.as_u16(),
            response_url: entry.response.url.to_string(),
            headers: encode_headers(&entry.response.headers),
            body: STANDARD.encode(&entry.response.body),
            cached_at: entry.cached_at,
        }
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        let mut request = Request::new(method, parse_url(&self.url)?);
        request.headers = decode_headers(self.request_headers)?;

        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        let body = STANDARD
            .decode(self.body)
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        let response = Response::new(
            parse_url(&self.response_url)?,
            status,
            decode_headers(self.headers)?,
            body,
        );

        Ok(CacheEntry {
            request,
            response,
            cached_at: self.cached_at,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ServiceWorkerError::Persistence(format!("{raw}: {e}")))
}

fn encode_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(value) => Some((name.to_string(), value.to_string())),
            Err(_) => {
                warn!(header = %name, "Skipping non-UTF-8 header in snapshot");
                None
            }
        })
        .collect()
}

fn decode_headers(pairs: Vec<(String, String)>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MatchOptions;
    use crate::testing::get;

    #[test]
    fn test_snapshot_restores_binary_bodies_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("image/png"));
        let png = vec![0x89, b'P', b'N', b'G', 0x00, 0xff];
        let url = "https://example.com/static/icons/icon-192x192.png";

        let mut storage = CacheStorage::new();
        storage
            .open("flask-pwa-cache")
            .put(
                get(url),
                Response::new(Url::parse(url).unwrap(), StatusCode::OK, headers, png.clone()),
            )
            .unwrap();

        let json = CacheSnapshot::capture(&storage).to_json().unwrap();
        let restored = CacheSnapshot::from_json(&json).unwrap().restore().unwrap();

        let entry = restored
            .match_request(&get(url), &MatchOptions::default())
            .unwrap();
        assert_eq!(entry.response.body.as_ref(), png.as_slice());
        assert_eq!(entry.response.content_type(), Some("image/png"));
        assert_eq!(restored.keys(), vec!["flask-pwa-cache"]);
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let snapshot = CacheSnapshot {
            version: 99,
            caches: Vec::new(),
        };
        assert!(matches!(
            snapshot.restore(),
            Err(ServiceWorkerError::Persistence(_))
        ));
    }

    #[test]
    fn test_restore_rejects_corrupt_body() {
        let raw = r#"{
            "version": 1,
            "caches": [{
                "name": "flask-pwa-cache",
                "entries": [{
                    "method": "GET",
                    "url": "https://example.com/",
                    "status": 200,
                    "response_url": "https://example.com/",
                    "body": "not base64!",
                    "cached_at": 0
                }]
            }]
        }"#;
        let snapshot = CacheSnapshot::from_json(raw).unwrap();
        assert!(snapshot.restore().is_err());
    }
}
