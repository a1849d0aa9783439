// SPDX-License-Identifier: MIT
//! ChargeLink: client connectivity layer for the EV charging dashboard.
//!
//! Three cooperating pieces sit between the UI and the backend:
//!
//! - [`http::RequestClient`]: authenticated JSON requests with bounded
//!   exponential-backoff retries, auth-failure session invalidation and a
//!   debounced rate-limit notice.
//! - [`session::SessionManager`]: login, restore, role switching and a
//!   background inactivity monitor that expires idle sessions.
//! - [`realtime::RealtimeChannel`]: a reconnecting WebSocket channel with an
//!   idempotent per-charger subscription registry.
//!
//! [`ClientContext`] wires all three against real transports; the
//! [`http::HttpTransport`] and [`realtime::SocketConnector`] seams accept
//! test doubles.

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod realtime;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::{Arc, RwLock};

use config::ClientConfig;
use error::TransportError;
use events::{ClientEvents, Navigator};
use http::{HttpTransport, RequestClient, ReqwestTransport};
use realtime::{RealtimeChannel, SocketConnector, WsConnector};
use session::{SessionManager, SharedSession};
use store::SessionStore;

/// Fully wired client stack sharing one config, store, event bus and
/// navigator.
pub struct ClientContext {
    pub config: ClientConfig,
    pub store: SessionStore,
    pub events: ClientEvents,
    pub navigator: Arc<Navigator>,
    pub http: Arc<RequestClient>,
    pub session: Arc<SessionManager>,
    pub realtime: Arc<RealtimeChannel>,
}

impl ClientContext {
    /// Wire the stack against real HTTP and WebSocket transports with an
    /// in-memory store.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Ok(Self::with_transports(
            config,
            transport,
            Arc::new(WsConnector::new()),
            SessionStore::in_memory(),
        ))
    }

    /// Wire the stack against caller-supplied transports and store.
    pub fn with_transports(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn SocketConnector>,
        store: SessionStore,
    ) -> Self {
        let events = ClientEvents::new();
        let navigator = Arc::new(Navigator::new());
        let shared: SharedSession = Arc::new(RwLock::new(None));

        let http = Arc::new(RequestClient::new(
            config.clone(),
            transport,
            store.clone(),
            Arc::clone(&shared),
            Arc::clone(&navigator),
            events.clone(),
        ));
        let session = Arc::new(SessionManager::new(
            config.clone(),
            Arc::clone(&http),
            store.clone(),
            shared,
            Arc::clone(&navigator),
            events.clone(),
        ));
        let realtime = Arc::new(RealtimeChannel::new(
            config.clone(),
            connector,
            store.clone(),
        ));

        Self {
            config,
            store,
            events,
            navigator,
            http,
            session,
            realtime,
        }
    }
}
