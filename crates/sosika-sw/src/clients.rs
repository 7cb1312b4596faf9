//! Controlled clients: the app windows and workers the engine can see.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::SwError;

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Kind of client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Window,
    Worker,
}

/// A page or worker the engine controls (or could control).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Kind of client.
    pub kind: ClientKind,

    /// Whether the client has focus.
    pub focused: bool,

    /// Whether the client is visible.
    pub visible: bool,

    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// Create an uncontrolled window client at a URL.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            kind: ClientKind::Window,
            focused: false,
            visible: true,
            controlled: false,
        }
    }
}

/// Registry of open clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// All clients, optionally filtered by kind.
    pub fn match_all(&self, kind: Option<ClientKind>) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .collect()
    }

    /// Find a window client already showing the given URL.
    pub fn find_window_at(&self, url: &Url) -> Option<String> {
        self.clients
            .values()
            .find(|c| c.kind == ClientKind::Window && c.url == *url)
            .map(|c| c.id.clone())
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<(), SwError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))?;

        if client.kind != ClientKind::Window {
            return Err(SwError::State(format!(
                "cannot focus non-window client {id}"
            )));
        }

        client.focused = true;
        client.visible = true;
        debug!(client = %id, url = %client.url, "Focused client");
        Ok(())
    }

    /// Open a new, focused window at a URL.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        client.controlled = true;
        debug!(client = %client.id, url = %client.url, "Opened window");
        self.add(client.clone());
        client
    }

    /// Take control of every open client. Returns how many were claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
