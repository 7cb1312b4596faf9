//! Worker events and the pending-work (`waitUntil`) contract.
//!
//! The host dispatches one event at a time into the engine. Handlers that
//! kick off background futures register them on the event's [`PendingWork`];
//! the host must await [`PendingWork::settle`] (or
//! [`DispatchOutcome::settle`]) before it may tear the worker down, otherwise
//! in-flight cache writes get cancelled.

use bytes::Bytes;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::fetch::{FetchRequest, FetchResponse};
use crate::push::NotificationId;

/// An event delivered to the worker by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A new worker version is installing.
    Install,
    /// The installed worker is taking control.
    Activate,
    /// An intercepted network request.
    Fetch(FetchEvent),
    /// A push message from the messaging provider.
    Push(PushEvent),
    /// The user clicked a shown notification.
    NotificationClick(NotificationClickEvent),
}

/// An intercepted fetch.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The request being intercepted.
    pub request: FetchRequest,

    /// The client that issued the request, if known.
    pub client_id: Option<String>,
}

impl FetchEvent {
    /// Create a fetch event with no originating client.
    pub fn new(request: FetchRequest) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// A delivered push message, raw bytes as handed over by the provider.
#[derive(Debug, Clone)]
pub struct PushEvent {
    /// Raw payload; `None` when the provider delivered an empty push.
    pub data: Option<Bytes>,
}

impl PushEvent {
    /// Create a push event from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// Create an empty push event.
    pub fn empty() -> Self {
        Self { data: None }
    }

    /// Create a push event carrying a JSON value.
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            data: Some(Bytes::from(serde_json::to_vec(value).unwrap_or_default())),
        }
    }
}

/// A click on a shown notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    /// The clicked notification.
    pub notification_id: NotificationId,
}

/// Background work registered by an event handler.
///
/// Mirrors `event.waitUntil`: the host keeps the worker alive until `settle`
/// resolves.
#[derive(Debug, Default)]
pub struct PendingWork {
    tasks: Vec<JoinHandle<()>>,
}

impl PendingWork {
    /// Create an empty set of pending work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-spawned task.
    pub fn wait_until(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Spawn a future and register it.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether any work is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await all registered work.
    pub async fn settle(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task failed");
            }
        }
    }
}

/// What an event dispatch produced.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// The response to serve; `None` means pass the request through to
    /// normal network handling.
    pub response: Option<FetchResponse>,

    /// Background work the host must keep the worker alive for.
    pub work: PendingWork,
}

impl DispatchOutcome {
    /// An outcome with neither response nor background work.
    pub fn pass_through() -> Self {
        Self::default()
    }

    /// An outcome serving a response.
    pub fn with_response(response: FetchResponse) -> Self {
        Self {
            response: Some(response),
            work: PendingWork::new(),
        }
    }

    /// An outcome carrying only background work.
    pub fn with_work(work: PendingWork) -> Self {
        Self {
            response: None,
            work,
        }
    }

    /// Await the background work, then yield the response.
    pub async fn settle(self) -> Option<FetchResponse> {
        self.work.settle().await;
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_awaits_registered_work() {
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();

        let mut work = PendingWork::new();
        work.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            done_clone.store(true, Ordering::SeqCst);
        });

        assert_eq!(work.len(), 1);
        work.settle().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_outcome_settle_returns_response() {
        let outcome = DispatchOutcome::with_response(FetchResponse::ok("hi"));
        let response = outcome.settle().await.unwrap();
        assert_eq!(response.body, bytes::Bytes::from("hi"));
    }

    #[test]
    fn test_push_event_json() {
        let event = PushEvent::json(&serde_json::json!({"notification": {"title": "t"}}));
        assert!(event.data.is_some());
        assert!(PushEvent::empty().data.is_none());
    }
}
