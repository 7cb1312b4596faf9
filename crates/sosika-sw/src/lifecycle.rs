//! Worker versions and the registration lifecycle.
//!
//! A registration tracks up to three worker versions: one installing, one
//! installed-and-waiting, one active. A failed install marks the new version
//! redundant and leaves the active one serving; the Sosika worker skips the
//! waiting phase so a successful install activates right away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use url::Url;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Script parsed, nothing run yet.
    #[default]
    Parsed,
    /// Install in progress.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activation in progress.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced or failed; will never serve.
    Redundant,
}

/// One version of the worker.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// Script URL this version was built from.
    pub script_url: Url,

    /// Current state.
    pub state: WorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker version.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: WorkerId::new(),
            script_url,
            state: WorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// The registration for a scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Version currently installing.
    pub installing: Option<ServiceWorker>,

    /// Version installed but not yet active.
    pub waiting: Option<ServiceWorker>,

    /// Version controlling clients.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create an empty registration for a scope.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new version. Returns its ID.
    pub fn update(&mut self, script_url: Url) -> WorkerId {
        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Install failed: the new version becomes redundant, the previously
    /// active version keeps serving.
    pub fn fail_install(&mut self, error: impl Into<String>) -> Option<WorkerId> {
        let mut worker = self.installing.take()?;
        worker.error = Some(error.into());
        worker.set_state(WorkerState::Redundant);
        Some(worker.id)
    }

    /// Install succeeded: installing moves to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Activate the waiting version, retiring the old active one.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);

            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
            }

            worker.set_state(WorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Skip the waiting phase (the Sosika worker always does).
    pub fn skip_waiting(&mut self) {
        self.activate();
    }

    /// Drop all versions.
    pub fn unregister(&mut self) {
        for slot in [&mut self.installing, &mut self.waiting, &mut self.active] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(WorkerState::Redundant);
            }
        }
    }
}
