// SPDX-License-Identifier: MIT
//! User-facing side effects as observable state.
//!
//! The connectivity layer never renders anything. Toasts become events on a
//! broadcast bus ([`ClientEvents`]); router redirects become writes to an
//! observable navigation target ([`Navigator`]). The UI layer subscribes to
//! the bus and watches the target.

use std::sync::RwLock;

use tokio::sync::broadcast;

/// Events the UI layer may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server signalled backpressure (429). Emitted at most once per
    /// cool-down window regardless of how many 429s arrive.
    RateLimited {
        /// Machine-readable retry-after from the response body, in seconds.
        retry_after_secs: Option<u64>,
    },
    /// A 401/403 invalidated the session.
    Unauthorized,
    /// The session expired from inactivity while logged in.
    SessionExpired,
}

/// Broadcasts [`ClientEvent`]s to all subscribers.
#[derive(Clone)]
pub struct ClientEvents {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for ClientEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Send an event to all subscribers. No subscribers is fine.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events. Dropping the receiver detaches.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

/// Observable navigation target. Writing `/login` here is the layer's
/// equivalent of a router redirect; the UI decides when to act on it.
#[derive(Default)]
pub struct Navigator {
    target: RwLock<Option<String>>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the navigation target. Callers must clear session storage
    /// *before* calling this.
    pub fn goto(&self, path: &str) {
        *self.target.write().expect("navigator lock poisoned") = Some(path.to_string());
    }

    /// Current navigation target, if any component requested one.
    pub fn target(&self) -> Option<String> {
        self.target.read().expect("navigator lock poisoned").clone()
    }

    /// Clear the target once the UI has navigated.
    pub fn consume(&self) -> Option<String> {
        self.target.write().expect("navigator lock poisoned").take()
    }
}
