//! # Sosika Service Worker
//!
//! Offline service-worker engine for the Sosika delivery app: precaching of
//! the app shell, route-based runtime caching, and push notifications.
//!
//! ## Features
//!
//! - **Precache**: install-time caching of the build manifest, stale-entry
//!   eviction on activation
//! - **Routing**: first-match route registry with per-method defaults
//! - **Strategies**: network-first (documents), stale-while-revalidate
//!   (static assets)
//! - **Push**: payload parsing with fallbacks, notification click routing
//! - **Lifecycle**: install/activate state machine with fail-closed installs
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerEngine
//!     │
//!     ├── dispatch(WorkerEvent)
//!     │       ├── Install ───────→ PrecacheController::install
//!     │       ├── Activate ──────→ stale eviction + Clients::claim
//!     │       ├── Fetch ─────────→ Router ──→ Strategy ──→ Fetch backend
//!     │       ├── Push ──────────→ NotificationCenter::show
//!     │       └── NotificationClick ─→ Clients focus / open_window
//!     │
//!     ├── CacheStorage (app-cache, html-cache, assets-cache, precache)
//!     └── PendingWork (waitUntil: host awaits before teardown)
//! ```

use std::sync::Arc;

use http::Method;
use sosika_common::{RetryConfig, SosikaError};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

pub mod cache;
pub mod clients;
pub mod events;
pub mod fetch;
pub mod lifecycle;
pub mod precache;
pub mod push;
pub mod router;
pub mod strategy;

pub use cache::{CacheStorage, CachedResponse, APP_CACHE, ASSETS_CACHE, HTML_CACHE};
pub use clients::{Client, ClientKind, Clients};
pub use events::{
    DispatchOutcome, FetchEvent, NotificationClickEvent, PendingWork, PushEvent, WorkerEvent,
};
pub use fetch::{Fetch, FetchFn, FetchFuture, FetchRequest, FetchResponse};
pub use lifecycle::{Registration, ServiceWorker, WorkerId, WorkerState};
pub use precache::{ManifestEntry, PrecacheController, PrecacheManifest};
pub use push::{NotificationCenter, NotificationDefaults, NotificationId, PushPayload};
pub use router::{matchers, Matcher, RouteMatch, Router};
pub use strategy::{Strategy, StrategyContext};

// ==================== Errors ====================

/// Errors the worker engine can produce.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Manifest conflict for {url}: revision {existing:?} vs {incoming:?}")]
    ManifestConflict {
        url: String,
        existing: Option<String>,
        incoming: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State error: {0}")]
    State(String),
}

impl From<SwError> for SosikaError {
    fn from(err: SwError) -> Self {
        match err {
            SwError::Network(msg) => SosikaError::network(msg),
            SwError::Cache(msg) | SwError::InstallFailed(msg) => SosikaError::cache(msg),
            SwError::ManifestConflict { .. } => SosikaError::config(err.to_string()),
            SwError::NotFound(msg) => SosikaError::NotFound(msg),
            SwError::InvalidUrl(msg) | SwError::Payload(msg) => {
                SosikaError::InvalidArgument(msg)
            }
            SwError::State(msg) => SosikaError::internal(msg),
        }
    }
}

// ==================== Configuration ====================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scope the worker controls (the app origin).
    pub scope: Url,

    /// URL of the worker script itself.
    pub script_url: Url,

    /// Versioned precache name; bump per deploy scheme.
    pub precache_name: String,

    /// Fallbacks for absent push notification fields.
    pub notification_defaults: NotificationDefaults,

    /// Retry policy for background revalidation fetches.
    pub revalidate_retry: RetryConfig,
}

impl EngineConfig {
    /// Create a configuration for a scope with Sosika defaults.
    pub fn new(scope: Url) -> Self {
        let script_url = scope
            .join("service-worker.js")
            .unwrap_or_else(|_| scope.clone());
        Self {
            scope,
            script_url,
            precache_name: "sosika-precache-v1".to_string(),
            notification_defaults: NotificationDefaults::default(),
            revalidate_retry: RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            },
        }
    }
}

// ==================== Engine events ====================

/// Lifecycle notifications emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A worker version changed state.
    StateChange { worker_id: WorkerId, state: WorkerState },

    /// Activation evicted stale precache entries.
    PrecacheEvicted { removed: usize },

    /// The engine took control of open clients.
    ControllerChange { claimed: usize },

    /// A notification was shown.
    NotificationShown { id: NotificationId },

    /// Notification click opened a new window.
    WindowOpened { client_id: String },
}

// ==================== Engine ====================

/// The worker engine: one context object owning every registry, with an
/// explicit per-event dispatch.
pub struct ServiceWorkerEngine {
    config: EngineConfig,
    precache: PrecacheController,
    fetcher: Arc<dyn Fetch>,
    router: RwLock<Router>,

    /// Named caches.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Open clients.
    pub clients: Arc<RwLock<Clients>>,

    /// Shown notifications.
    pub notifications: Arc<RwLock<NotificationCenter>>,

    /// The scope registration.
    pub registration: Arc<RwLock<Registration>>,

    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ServiceWorkerEngine {
    /// Create an engine for a precache manifest.
    pub fn new(
        config: EngineConfig,
        manifest: PrecacheManifest,
        fetcher: Arc<dyn Fetch>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let precache = PrecacheController::new(
            config.precache_name.clone(),
            config.scope.clone(),
            manifest,
        );
        let registration = Arc::new(RwLock::new(Registration::new(config.scope.clone())));

        (
            Self {
                config,
                precache,
                fetcher,
                router: RwLock::new(Router::new()),
                caches: Arc::new(RwLock::new(CacheStorage::new())),
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(NotificationCenter::new())),
                registration,
                events_tx,
            },
            events_rx,
        )
    }

    /// The precache controller.
    pub fn precache(&self) -> &PrecacheController {
        &self.precache
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a GET route.
    pub async fn register_route(&self, matcher: Matcher, strategy: Strategy) {
        self.router.write().await.register(matcher, strategy);
    }

    /// Register a route for an explicit method.
    pub async fn register_route_with_method(
        &self,
        matcher: Matcher,
        strategy: Strategy,
        method: Method,
    ) {
        self.router
            .write()
            .await
            .register_with_method(matcher, strategy, method);
    }

    /// Set the fallback handler for a method.
    pub async fn set_default_handler(&self, method: Method, strategy: Strategy) {
        self.router.write().await.set_default_handler(method, strategy);
    }

    /// Register the routes the Sosika worker ships with: network-first for
    /// documents, stale-while-revalidate for static assets, network-first
    /// into the app cache for everything else.
    pub async fn install_default_routes(&self) {
        let mut router = self.router.write().await;
        router.register(
            matchers::navigation(),
            Strategy::NetworkFirst {
                cache_name: HTML_CACHE.to_string(),
            },
        );
        router.register(
            matchers::extensions(&["js", "css", "woff2", "wasm"]),
            Strategy::StaleWhileRevalidate {
                cache_name: ASSETS_CACHE.to_string(),
            },
        );
        router.set_default_handler(
            Method::GET,
            Strategy::NetworkFirst {
                cache_name: APP_CACHE.to_string(),
            },
        );
    }

    /// Dispatch one host event into the engine.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<DispatchOutcome, SwError> {
        match event {
            WorkerEvent::Install => self.on_install().await,
            WorkerEvent::Activate => self.on_activate().await,
            WorkerEvent::Fetch(event) => self.on_fetch(event).await,
            WorkerEvent::Push(event) => self.on_push(event).await,
            WorkerEvent::NotificationClick(event) => self.on_notification_click(event).await,
        }
    }

    async fn on_install(&self) -> Result<DispatchOutcome, SwError> {
        let worker_id = self
            .registration
            .write()
            .await
            .update(self.config.script_url.clone());
        self.emit(EngineEvent::StateChange {
            worker_id,
            state: WorkerState::Installing,
        });

        if let Err(err) = self
            .precache
            .install(self.fetcher.as_ref(), self.caches.as_ref())
            .await
        {
            warn!(error = %err, "Install failed; previous version stays in control");
            let _ = self.registration.write().await.fail_install(err.to_string());
            self.emit(EngineEvent::StateChange {
                worker_id,
                state: WorkerState::Redundant,
            });
            return Err(err);
        }

        self.registration.write().await.install_complete();
        self.emit(EngineEvent::StateChange {
            worker_id,
            state: WorkerState::Installed,
        });
        info!(scope = %self.config.scope, "Worker installed");
        Ok(DispatchOutcome::default())
    }

    async fn on_activate(&self) -> Result<DispatchOutcome, SwError> {
        let removed = self.precache.activate(self.caches.as_ref()).await?;
        self.emit(EngineEvent::PrecacheEvicted { removed });

        {
            let mut registration = self.registration.write().await;
            registration.skip_waiting();
            if let Some(worker) = registration.active.as_ref() {
                self.emit(EngineEvent::StateChange {
                    worker_id: worker.id,
                    state: WorkerState::Activated,
                });
            }
        }

        let claimed = self.clients.write().await.claim();
        self.emit(EngineEvent::ControllerChange { claimed });
        info!(scope = %self.config.scope, claimed, "Worker activated");
        Ok(DispatchOutcome::default())
    }

    async fn on_fetch(&self, event: FetchEvent) -> Result<DispatchOutcome, SwError> {
        let router = self.router.read().await;
        let (strategy, matched) = match router.find(&event.request) {
            Some(found) => found,
            None => {
                debug!(url = %event.request.url, "No route matched; passing through");
                return Ok(DispatchOutcome::pass_through());
            }
        };

        debug!(url = %matched.url, "Route matched");
        let ctx = StrategyContext {
            caches: Arc::clone(&self.caches),
            fetcher: Arc::clone(&self.fetcher),
            revalidate_retry: self.config.revalidate_retry.clone(),
        };

        let mut work = PendingWork::new();
        let response = strategy.handle(&ctx, &event.request, &mut work).await?;
        Ok(DispatchOutcome {
            response: Some(response),
            work,
        })
    }

    async fn on_push(&self, event: PushEvent) -> Result<DispatchOutcome, SwError> {
        let raw = match event.data {
            Some(raw) => raw,
            None => {
                warn!("Push event carried no payload; dropping");
                return Ok(DispatchOutcome::default());
            }
        };

        let payload: PushPayload = match serde_json::from_slice(&raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Dropping malformed push payload");
                return Ok(DispatchOutcome::default());
            }
        };

        let options = payload.resolve(&self.config.notification_defaults);
        let notifications = Arc::clone(&self.notifications);
        let events_tx = self.events_tx.clone();

        let mut work = PendingWork::new();
        work.spawn(async move {
            let id = notifications.write().await.show(options);
            debug!(?id, "Notification shown");
            let _ = events_tx.send(EngineEvent::NotificationShown { id });
        });
        Ok(DispatchOutcome::with_work(work))
    }

    async fn on_notification_click(
        &self,
        event: NotificationClickEvent,
    ) -> Result<DispatchOutcome, SwError> {
        let closed = self
            .notifications
            .write()
            .await
            .close(event.notification_id);

        let target = closed
            .as_ref()
            .and_then(|n| n.target_url())
            .unwrap_or("/")
            .to_string();
        let url = self
            .config
            .scope
            .join(&target)
            .map_err(|e| SwError::InvalidUrl(format!("{target}: {e}")))?;

        let mut clients = self.clients.write().await;
        match clients.find_window_at(&url) {
            Some(id) => {
                clients.focus(&id)?;
                debug!(client = %id, url = %url, "Focused existing window");
            }
            None => {
                let client = clients.open_window(url);
                self.emit(EngineEvent::WindowOpened {
                    client_id: client.id,
                });
            }
        }
        Ok(DispatchOutcome::default())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }
}

// ==================== Test utilities ====================

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use hashbrown::HashMap;
    use std::sync::Mutex;

    /// Fetch backend serving scripted responses keyed by absolute URL.
    pub(crate) struct ScriptedFetch {
        responses: Mutex<HashMap<String, Result<FetchResponse, SwError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetch {
        pub(crate) fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn respond(&self, url: &str, response: FetchResponse) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), Ok(response));
        }

        pub(crate) fn fail(&self, url: &str) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), Err(SwError::Network("offline".to_string())));
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Fetch for ScriptedFetch {
        fn fetch(&self, request: FetchRequest) -> FetchFuture {
            let url = request.url.to_string();
            self.calls.lock().unwrap().push(url.clone());
            let result = self
                .responses
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .unwrap_or_else(|| Err(SwError::Network(format!("no response for {url}"))));
            Box::pin(async move { result })
        }
    }
}
