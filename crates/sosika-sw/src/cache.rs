//! Cache Storage: named key-value stores of cached responses.
//!
//! Entries are keyed by request URL, revision-qualified for precached assets.
//! Runtime caches are populated lazily by the strategies in
//! [`crate::strategy`]; the precache is populated at install time.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::fetch::FetchResponse;
use crate::SwError;

/// Runtime cache for navigations handled by the default route.
pub const APP_CACHE: &str = "app-cache";

/// Runtime cache for HTML documents.
pub const HTML_CACHE: &str = "html-cache";

/// Runtime cache for scripts, styles, and workers.
pub const ASSETS_CACHE: &str = "assets-cache";

/// Milliseconds since the UNIX epoch.
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A stored response: status, headers, body, and when it was cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// The cache key (possibly revision-qualified URL).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached-at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot a fetched response for storage.
    pub fn from_response(url: &str, response: &FetchResponse) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in response.headers.iter() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_ms(),
        }
    }

    /// Rebuild a response from the stored entry.
    pub fn to_response(&self) -> FetchResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers.iter() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        FetchResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(self.body.clone()),
        }
    }
}

/// A named cache.
#[derive(Debug, Default)]
pub struct Cache {
    name: String,
    entries: HashMap<String, CachedResponse>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Get the cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store an entry under a key.
    ///
    /// Refuses non-200 responses so error pages never shadow good content.
    pub fn put(&mut self, key: &str, entry: CachedResponse) -> Result<(), SwError> {
        if entry.status != StatusCode::OK.as_u16() {
            return Err(SwError::Cache(format!(
                "refusing to cache status {} for {}",
                entry.status, key
            )));
        }
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    /// Look up an entry by key.
    pub fn match_url(&self, key: &str) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    /// Delete an entry. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All named caches for the worker.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a whole cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names.
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    /// Look a key up across all caches.
    pub fn match_url(&self, key: &str) -> Option<&CachedResponse> {
        for cache in self.caches.values() {
            if let Some(entry) = cache.match_url(key) {
                return Some(entry);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, body: &str) -> CachedResponse {
        CachedResponse::from_response(key, &FetchResponse::ok(body.to_string()))
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = Cache::new(ASSETS_CACHE);
        let key = "https://app.sosika.dev/assets/app.js";

        cache.put(key, entry(key, "console.log(1)")).unwrap();

        assert!(cache.match_url(key).is_some());
        assert!(cache.match_url("https://app.sosika.dev/other.js").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_rejects_non_200() {
        let mut cache = Cache::new(HTML_CACHE);
        let key = "https://app.sosika.dev/";
        let not_found =
            CachedResponse::from_response(key, &FetchResponse::new(StatusCode::NOT_FOUND));

        assert!(matches!(cache.put(key, not_found), Err(SwError::Cache(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let mut cache = Cache::new(HTML_CACHE);
        let key = "https://app.sosika.dev/";

        cache.put(key, entry(key, "old")).unwrap();
        cache.put(key, entry(key, "new")).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_url(key).unwrap().body, b"new".to_vec());
    }

    #[test]
    fn test_delete() {
        let mut cache = Cache::new(APP_CACHE);
        let key = "https://app.sosika.dev/vendors";

        cache.put(key, entry(key, "{}")).unwrap();
        assert!(cache.delete(key));
        assert!(!cache.delete(key));
        assert!(cache.match_url(key).is_none());
    }

    #[test]
    fn test_storage_open_has_delete() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has(HTML_CACHE));
        storage.open(HTML_CACHE);
        assert!(storage.has(HTML_CACHE));

        assert!(storage.delete(HTML_CACHE));
        assert!(!storage.has(HTML_CACHE));
    }

    #[test]
    fn test_storage_match_across_caches() {
        let mut storage = CacheStorage::new();
        let key = "https://app.sosika.dev/assets/app.css";

        storage.open(HTML_CACHE);
        storage
            .open(ASSETS_CACHE)
            .put(key, entry(key, "body{}"))
            .unwrap();

        assert!(storage.match_url(key).is_some());
        assert!(storage.match_url("https://app.sosika.dev/missing").is_none());
    }

    #[test]
    fn test_round_trip_preserves_headers() {
        let mut response = FetchResponse::ok("payload");
        response.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let stored = CachedResponse::from_response("https://app.sosika.dev/x", &response);
        let rebuilt = stored.to_response();

        assert_eq!(rebuilt.status, StatusCode::OK);
        assert_eq!(rebuilt.header("content-type"), Some("application/json"));
        assert_eq!(rebuilt.body, Bytes::from("payload"));
    }
}
