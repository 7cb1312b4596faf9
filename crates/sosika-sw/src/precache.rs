//! Precaching: install-time population of the app shell.
//!
//! The build pipeline injects a manifest of `{url, revision}` pairs. On
//! install, every listed asset is fetched (revision-qualified, so stale HTTP
//! caches between us and the CDN are bypassed) and stored in the precache. On
//! activation, entries left over from previous deploys are evicted.
//!
//! Install is fail-closed: one bad asset aborts the whole install so a new
//! worker version never activates with a partially-cached app shell.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use hashbrown::HashMap;

use crate::cache::{CacheStorage, CachedResponse};
use crate::fetch::{Fetch, FetchRequest};
use crate::SwError;

/// Query parameter carrying the content revision on precache fetches.
pub const REVISION_PARAM: &str = "__sw_rev";

/// One entry of the build-time precache manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Asset URL, relative to the worker scope or absolute.
    pub url: String,

    /// Content revision; `None` means the URL is self-versioned (hashed
    /// filename) and needs no qualification.
    #[serde(default)]
    pub revision: Option<String>,
}

impl ManifestEntry {
    /// Create a revisioned entry.
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: Some(revision.into()),
        }
    }

    /// Create an entry for a self-versioned URL.
    pub fn unrevisioned(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
        }
    }
}

/// The deduplicated precache manifest.
#[derive(Debug, Clone, Default)]
pub struct PrecacheManifest {
    entries: Vec<ManifestEntry>,
    revisions: HashMap<String, Option<String>>,
}

impl PrecacheManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from entries, rejecting conflicts.
    pub fn from_entries(
        entries: impl IntoIterator<Item = ManifestEntry>,
    ) -> Result<Self, SwError> {
        let mut manifest = Self::new();
        for entry in entries {
            manifest.insert(entry)?;
        }
        Ok(manifest)
    }

    /// Parse the JSON manifest injected at build time.
    pub fn from_json(json: &str) -> Result<Self, SwError> {
        let entries: Vec<ManifestEntry> = serde_json::from_str(json)
            .map_err(|e| SwError::Payload(format!("invalid precache manifest: {e}")))?;
        Self::from_entries(entries)
    }

    /// Add an entry.
    ///
    /// An exact duplicate is dropped silently; the same URL with a different
    /// revision is a fatal setup error, never a silent overwrite.
    pub fn insert(&mut self, entry: ManifestEntry) -> Result<(), SwError> {
        match self.revisions.get(&entry.url) {
            Some(existing) if *existing == entry.revision => {
                debug!(url = %entry.url, "Duplicate manifest entry ignored");
                Ok(())
            }
            Some(existing) => Err(SwError::ManifestConflict {
                url: entry.url.clone(),
                existing: existing.clone(),
                incoming: entry.revision,
            }),
            None => {
                self.revisions
                    .insert(entry.url.clone(), entry.revision.clone());
                self.entries.push(entry);
                Ok(())
            }
        }
    }

    /// Iterate the entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Install-time precache controller.
pub struct PrecacheController {
    cache_name: String,
    scope: Url,
    manifest: PrecacheManifest,
}

impl PrecacheController {
    /// Create a controller for a versioned precache name.
    pub fn new(cache_name: impl Into<String>, scope: Url, manifest: PrecacheManifest) -> Self {
        Self {
            cache_name: cache_name.into(),
            scope,
            manifest,
        }
    }

    /// The versioned precache cache name.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// The current manifest.
    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    /// The revision-qualified cache key for a manifest entry.
    fn cache_key(&self, entry: &ManifestEntry) -> Result<String, SwError> {
        let mut url = self
            .scope
            .join(&entry.url)
            .map_err(|e| SwError::InvalidUrl(format!("{}: {e}", entry.url)))?;
        if let Some(revision) = &entry.revision {
            url.query_pairs_mut().append_pair(REVISION_PARAM, revision);
        }
        Ok(url.to_string())
    }

    /// All cache keys the current manifest produces.
    pub fn cache_keys(&self) -> Result<Vec<String>, SwError> {
        self.manifest
            .entries()
            .map(|entry| self.cache_key(entry))
            .collect()
    }

    /// Install phase: fetch and store every manifest asset.
    ///
    /// Aborts on the first asset that fails to fetch or returns a non-2xx
    /// status, leaving the previous worker version in control.
    pub async fn install(
        &self,
        fetcher: &dyn Fetch,
        caches: &RwLock<CacheStorage>,
    ) -> Result<(), SwError> {
        for entry in self.manifest.entries() {
            let key = self.cache_key(entry)?;
            let url = Url::parse(&key)
                .map_err(|e| SwError::InvalidUrl(format!("{key}: {e}")))?;

            let response = fetcher
                .fetch(FetchRequest::get(url))
                .await
                .map_err(|e| SwError::InstallFailed(format!("{}: {e}", entry.url)))?;

            if !response.is_success() {
                return Err(SwError::InstallFailed(format!(
                    "{} returned status {}",
                    entry.url, response.status
                )));
            }

            caches
                .write()
                .await
                .open(&self.cache_name)
                .put(&key, CachedResponse::from_response(&key, &response))
                .map_err(|e| SwError::InstallFailed(e.to_string()))?;

            debug!(url = %entry.url, key = %key, "Precached asset");
        }

        info!(
            cache = %self.cache_name,
            assets = self.manifest.len(),
            "Precache install complete"
        );
        Ok(())
    }

    /// Activation phase: evict entries no longer in the manifest.
    ///
    /// Returns the number of evicted entries.
    pub async fn activate(&self, caches: &RwLock<CacheStorage>) -> Result<usize, SwError> {
        let expected = self.cache_keys()?;

        let mut caches = caches.write().await;
        let cache = caches.open(&self.cache_name);

        let mut removed = 0;
        for key in cache.keys() {
            if !expected.contains(&key) {
                cache.delete(&key);
                removed += 1;
                debug!(key = %key, "Evicted stale precache entry");
            }
        }

        if removed > 0 {
            info!(cache = %self.cache_name, removed, "Evicted stale precache entries");
        }
        Ok(removed)
    }

    /// Look up the precached response for a logical manifest URL.
    pub async fn precached(
        &self,
        caches: &RwLock<CacheStorage>,
        url: &str,
    ) -> Option<CachedResponse> {
        let entry = self.manifest.entries().find(|e| e.url == url)?;
        let key = match self.cache_key(entry) {
            Ok(key) => key,
            Err(e) => {
                warn!(url, error = %e, "Bad manifest URL");
                return None;
            }
        };
        caches
            .read()
            .await
            .get(&self.cache_name)
            .and_then(|cache| cache.match_url(&key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use crate::testutil::ScriptedFetch;
    use http::StatusCode;

    const PRECACHE: &str = "sosika-precache-v1";

    fn scope() -> Url {
        Url::parse("https://app.sosika.dev/").unwrap()
    }

    fn manifest_v1() -> PrecacheManifest {
        PrecacheManifest::from_entries([
            ManifestEntry::new("/index.html", "abc123"),
            ManifestEntry::unrevisioned("/assets/app.31337.js"),
        ])
        .unwrap()
    }

    #[test]
    fn test_conflict_detection() {
        let mut manifest = PrecacheManifest::new();
        manifest.insert(ManifestEntry::new("/index.html", "abc")).unwrap();

        // Identical duplicate is fine.
        manifest.insert(ManifestEntry::new("/index.html", "abc")).unwrap();
        assert_eq!(manifest.len(), 1);

        // Same URL, different revision is fatal.
        let err = manifest
            .insert(ManifestEntry::new("/index.html", "def"))
            .unwrap_err();
        assert!(matches!(err, SwError::ManifestConflict { .. }));
    }

    #[test]
    fn test_from_json() {
        let manifest = PrecacheManifest::from_json(
            r#"[{"url":"/index.html","revision":"abc123"},{"url":"/assets/app.31337.js","revision":null}]"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);

        assert!(PrecacheManifest::from_json("not json").is_err());
    }

    #[test]
    fn test_cache_keys_revision_qualified() {
        let controller = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let keys = controller.cache_keys().unwrap();

        assert_eq!(
            keys[0],
            "https://app.sosika.dev/index.html?__sw_rev=abc123"
        );
        // Self-versioned URL is stored as-is.
        assert_eq!(keys[1], "https://app.sosika.dev/assets/app.31337.js");
    }

    #[tokio::test]
    async fn test_install_populates_every_manifest_url() {
        let controller = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let fetcher = ScriptedFetch::new();
        fetcher.respond(
            "https://app.sosika.dev/index.html?__sw_rev=abc123",
            FetchResponse::ok("<html>"),
        );
        fetcher.respond(
            "https://app.sosika.dev/assets/app.31337.js",
            FetchResponse::ok("js"),
        );
        let caches = RwLock::new(CacheStorage::new());

        controller.install(&fetcher, &caches).await.unwrap();

        let caches = caches.read().await;
        let cache = caches.get(PRECACHE).unwrap();
        for key in controller.cache_keys().unwrap() {
            assert!(cache.match_url(&key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_install_fails_on_non_2xx() {
        let controller = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let fetcher = ScriptedFetch::new();
        fetcher.respond(
            "https://app.sosika.dev/index.html?__sw_rev=abc123",
            FetchResponse::new(StatusCode::NOT_FOUND),
        );
        let caches = RwLock::new(CacheStorage::new());

        let err = controller.install(&fetcher, &caches).await.unwrap_err();
        assert!(matches!(err, SwError::InstallFailed(_)));
    }

    #[tokio::test]
    async fn test_install_fails_on_network_error() {
        let controller = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let fetcher = ScriptedFetch::new();
        let caches = RwLock::new(CacheStorage::new());

        let err = controller.install(&fetcher, &caches).await.unwrap_err();
        assert!(matches!(err, SwError::InstallFailed(_)));
    }

    #[tokio::test]
    async fn test_activate_evicts_stale_entries() {
        let caches = RwLock::new(CacheStorage::new());

        // Deploy v1.
        let v1 = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let fetcher = ScriptedFetch::new();
        fetcher.respond(
            "https://app.sosika.dev/index.html?__sw_rev=abc123",
            FetchResponse::ok("<html v1>"),
        );
        fetcher.respond(
            "https://app.sosika.dev/assets/app.31337.js",
            FetchResponse::ok("js v1"),
        );
        v1.install(&fetcher, &caches).await.unwrap();

        // Deploy v2: index.html revised, new asset, old asset dropped.
        let manifest_v2 = PrecacheManifest::from_entries([
            ManifestEntry::new("/index.html", "def456"),
            ManifestEntry::unrevisioned("/assets/app.41414.js"),
        ])
        .unwrap();
        let v2 = PrecacheController::new(PRECACHE, scope(), manifest_v2);
        fetcher.respond(
            "https://app.sosika.dev/index.html?__sw_rev=def456",
            FetchResponse::ok("<html v2>"),
        );
        fetcher.respond(
            "https://app.sosika.dev/assets/app.41414.js",
            FetchResponse::ok("js v2"),
        );
        v2.install(&fetcher, &caches).await.unwrap();

        let removed = v2.activate(&caches).await.unwrap();
        assert_eq!(removed, 2);

        let caches = caches.read().await;
        let cache = caches.get(PRECACHE).unwrap();
        assert!(cache
            .match_url("https://app.sosika.dev/index.html?__sw_rev=def456")
            .is_some());
        assert!(cache
            .match_url("https://app.sosika.dev/assets/app.41414.js")
            .is_some());
        assert!(cache
            .match_url("https://app.sosika.dev/index.html?__sw_rev=abc123")
            .is_none());
        assert!(cache
            .match_url("https://app.sosika.dev/assets/app.31337.js")
            .is_none());
    }

    #[tokio::test]
    async fn test_precached_lookup() {
        let controller = PrecacheController::new(PRECACHE, scope(), manifest_v1());
        let fetcher = ScriptedFetch::new();
        fetcher.respond(
            "https://app.sosika.dev/index.html?__sw_rev=abc123",
            FetchResponse::ok("<html>"),
        );
        fetcher.respond(
            "https://app.sosika.dev/assets/app.31337.js",
            FetchResponse::ok("js"),
        );
        let caches = RwLock::new(CacheStorage::new());
        controller.install(&fetcher, &caches).await.unwrap();

        let hit = controller.precached(&caches, "/index.html").await.unwrap();
        assert_eq!(hit.body, b"<html>".to_vec());

        assert!(controller.precached(&caches, "/nope.html").await.is_none());
    }
}
