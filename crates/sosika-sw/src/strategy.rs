//! Caching strategies.
//!
//! Two policies cover the Sosika app:
//!
//! - **Network-first** for HTML documents: fresh content when online, the
//!   last good copy when offline.
//! - **Stale-while-revalidate** for scripts, styles, and workers: cached copy
//!   served immediately, refreshed in the background for next time.
//!
//! Cache writes are gated on plain 200 responses everywhere.

use std::sync::Arc;

use sosika_common::{retry_with_backoff, RetryConfig};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, CachedResponse};
use crate::events::PendingWork;
use crate::fetch::{Fetch, FetchRequest, FetchResponse};
use crate::SwError;

/// Shared handles a strategy needs to do its work.
pub struct StrategyContext {
    /// The worker's cache storage.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// The network backend.
    pub fetcher: Arc<dyn Fetch>,

    /// Retry policy for background revalidation fetches.
    pub revalidate_retry: RetryConfig,
}

/// A caching policy for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Network first, cache fallback. Used for HTML documents.
    NetworkFirst { cache_name: String },

    /// Cached copy immediately, background refresh. Used for static assets.
    StaleWhileRevalidate { cache_name: String },
}

impl Strategy {
    /// Handle a request under this policy.
    ///
    /// Background refreshes are registered on `work`; the caller must settle
    /// it before the worker may be torn down.
    pub async fn handle(
        &self,
        ctx: &StrategyContext,
        request: &FetchRequest,
        work: &mut PendingWork,
    ) -> Result<FetchResponse, SwError> {
        match self {
            Strategy::NetworkFirst { cache_name } => {
                self.network_first(ctx, request, cache_name).await
            }
            Strategy::StaleWhileRevalidate { cache_name } => {
                self.stale_while_revalidate(ctx, request, cache_name, work)
                    .await
            }
        }
    }

    async fn network_first(
        &self,
        ctx: &StrategyContext,
        request: &FetchRequest,
        cache_name: &str,
    ) -> Result<FetchResponse, SwError> {
        let key = request.url.to_string();

        match ctx.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.is_cacheable() {
                    let entry = CachedResponse::from_response(&key, &response);
                    if let Err(err) = ctx.caches.write().await.open(cache_name).put(&key, entry) {
                        warn!(url = %key, error = %err, "Failed to cache response");
                    }
                } else {
                    debug!(url = %key, status = %response.status, "Not caching response");
                }
                Ok(response)
            }
            Err(err) => {
                let caches = ctx.caches.read().await;
                match caches.get(cache_name).and_then(|c| c.match_url(&key)) {
                    Some(entry) => {
                        debug!(url = %key, "Network failed; serving cached copy");
                        Ok(entry.to_response())
                    }
                    None => {
                        warn!(url = %key, error = %err, "Network failed with no cached fallback");
                        Err(err)
                    }
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        ctx: &StrategyContext,
        request: &FetchRequest,
        cache_name: &str,
        work: &mut PendingWork,
    ) -> Result<FetchResponse, SwError> {
        let key = request.url.to_string();

        let cached = ctx
            .caches
            .read()
            .await
            .get(cache_name)
            .and_then(|c| c.match_url(&key))
            .cloned();

        match cached {
            Some(entry) => {
                debug!(url = %key, "Serving cached copy; revalidating in background");
                self.spawn_revalidate(ctx, request.clone(), cache_name.to_string(), work);
                Ok(entry.to_response())
            }
            None => {
                debug!(url = %key, "Cache miss; waiting on network");
                let response = ctx.fetcher.fetch(request.clone()).await?;
                if response.is_cacheable() {
                    let entry = CachedResponse::from_response(&key, &response);
                    if let Err(err) = ctx.caches.write().await.open(cache_name).put(&key, entry) {
                        warn!(url = %key, error = %err, "Failed to cache response");
                    }
                }
                Ok(response)
            }
        }
    }

    fn spawn_revalidate(
        &self,
        ctx: &StrategyContext,
        request: FetchRequest,
        cache_name: String,
        work: &mut PendingWork,
    ) {
        let caches = Arc::clone(&ctx.caches);
        let fetcher = Arc::clone(&ctx.fetcher);
        let retry = ctx.revalidate_retry.clone();

        work.spawn(async move {
            let key = request.url.to_string();
            let result = retry_with_backoff(&retry, || fetcher.fetch(request.clone())).await;

            match result {
                Ok(response) if response.is_cacheable() => {
                    let entry = CachedResponse::from_response(&key, &response);
                    match caches.write().await.open(&cache_name).put(&key, entry) {
                        Ok(()) => debug!(url = %key, "Refreshed cached copy"),
                        Err(err) => warn!(url = %key, error = %err, "Failed to refresh cache"),
                    }
                }
                Ok(response) => {
                    debug!(url = %key, status = %response.status, "Skipping refresh");
                }
                Err(err) => {
                    warn!(url = %key, error = %err, "Background revalidation failed");
                }
            }
        });
    }
}
