// SPDX-License-Identifier: MIT
//! Session lifecycle: login, restore, activity tracking, inactivity expiry.
//!
//! State machine: `LoggedOut → LoggingIn → LoggedIn → Expired → LoggedOut`.
//! While `LoggedIn`, a periodic monitor task compares elapsed time since the
//! last user activity against the inactivity threshold; crossing it purges
//! all persisted session keys, clears the in-memory identity and redirects
//! to the login view with an `expired` marker. The monitor has an explicit
//! `start_monitor`/`stop_monitor` lifecycle so embedders can tie it to their
//! own mount/unmount points.
//!
//! Authentication failures are never thrown: `login` returns a descriptive
//! [`LoginOutcome`] so calling code can render messaging. A stale persisted
//! session found during `restore` is purged silently; the `expired` marker
//! is reserved for expiry during a live session.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::{ClientEvent, ClientEvents, Navigator};
use crate::http::RequestClient;
use crate::store::SessionStore;

/// Login view path with the machine-readable expiry marker, so the UI can
/// explain why the user was logged out.
const EXPIRED_LOGIN_PATH: &str = "/login?reason=expired";

// ─── Identity & role ──────────────────────────────────────────────────────────

/// Display identity. Persisted only in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Closed role set. Anything the server sends outside this set normalizes to
/// the least-privileged role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    /// Normalize a server-provided role string; unrecognized values become
    /// `Viewer`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "operator" => Role::Operator,
            "viewer" => Role::Viewer,
            other => {
                if !other.is_empty() {
                    warn!(role = other, "unrecognized role; treating as viewer");
                }
                Role::Viewer
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// The one live session of this client process.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub role: Role,
    pub token: String,
    pub last_activity: DateTime<Utc>,
}

/// Shared in-memory session slot. `SessionManager` owns it; `RequestClient`
/// clears it on 401/403. A std lock keeps every access a plain synchronous
/// read-modify-write with no suspension point.
pub type SharedSession = Arc<RwLock<Option<Session>>>;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    Expired,
}

/// User-interaction signals that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
}

/// Login credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Result of a login attempt. Failures carry a human-readable reason and are
/// never returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Failed(String),
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success)
    }
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    id: String,
    name: String,
    email: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    user: LoginUser,
}

// ─── Manager ──────────────────────────────────────────────────────────────────

pub struct SessionManager {
    config: ClientConfig,
    http: Arc<RequestClient>,
    store: SessionStore,
    session: SharedSession,
    state: RwLock<SessionState>,
    navigator: Arc<Navigator>,
    events: ClientEvents,
    /// Inactivity monitor task, present while started.
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: ClientConfig,
        http: Arc<RequestClient>,
        store: SessionStore,
        session: SharedSession,
        navigator: Arc<Navigator>,
        events: ClientEvents,
    ) -> Self {
        Self {
            config,
            http,
            store,
            session,
            state: RwLock::new(SessionState::LoggedOut),
            navigator,
            events,
            monitor: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Snapshot of the live session, if any.
    pub fn current(&self) -> Option<Session> {
        self.session.read().expect("session lock poisoned").clone()
    }

    /// Authenticate against the backend. On success the token and normalized
    /// role are persisted durably, the identity ephemerally, and the state
    /// becomes `LoggedIn`. Every failure leaves the state `LoggedOut` and is
    /// reported as a descriptive [`LoginOutcome::Failed`].
    pub async fn login(&self, credentials: &Credentials) -> LoginOutcome {
        self.set_state(SessionState::LoggingIn);

        let result = self
            .http
            .post(
                "/auth/login",
                json!({
                    "email": credentials.email,
                    "password": credentials.password,
                }),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(ApiError::Unauthorized) => {
                self.set_state(SessionState::LoggedOut);
                return LoginOutcome::Failed("invalid email or password".to_string());
            }
            Err(err) => {
                self.set_state(SessionState::LoggedOut);
                warn!(err = %err, "login request failed");
                return LoginOutcome::Failed("could not reach the server".to_string());
            }
        };

        if response.status == 429 {
            self.set_state(SessionState::LoggedOut);
            return LoginOutcome::Failed("too many attempts, try again shortly".to_string());
        }
        if !response.is_ok() {
            self.set_state(SessionState::LoggedOut);
            let message = response
                .json_value()
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("login failed (status {})", response.status));
            return LoginOutcome::Failed(message);
        }

        let body: LoginResponse = match response.json() {
            Ok(body) => body,
            Err(err) => {
                self.set_state(SessionState::LoggedOut);
                warn!(err = %err, "malformed login response");
                return LoginOutcome::Failed("malformed login response".to_string());
            }
        };

        let role = Role::normalize(&body.user.role);
        let identity = Identity {
            id: body.user.id,
            name: body.user.name,
            email: body.user.email,
        };
        let now = Utc::now();

        self.store.set_token(&body.token);
        self.store.set_role(role.as_str());
        self.store.set_last_activity_millis(now.timestamp_millis());
        if let Ok(payload) = serde_json::to_string(&identity) {
            self.store.set_identity_json(&payload);
        }

        *self.session.write().expect("session lock poisoned") = Some(Session {
            identity,
            role,
            token: body.token,
            last_activity: now,
        });
        self.set_state(SessionState::LoggedIn);
        info!(role = role.as_str(), "logged in");
        LoginOutcome::Success
    }

    /// Reconstruct a session from persisted state. Run once at startup.
    ///
    /// Returns `true` when a valid, non-expired session was restored. Stale
    /// or unparseable state is purged and `false` returned without ever
    /// exposing the stale identity, and without navigation side effects.
    pub fn restore(&self) -> bool {
        let Some(token) = self.store.token() else {
            return false;
        };
        let Some(millis) = self.store.last_activity_millis() else {
            debug!("stored session has no activity timestamp; purging");
            self.store.clear_all();
            return false;
        };
        let Some(last_activity) = DateTime::from_timestamp_millis(millis) else {
            debug!("stored activity timestamp out of range; purging");
            self.store.clear_all();
            return false;
        };

        if self.idle_beyond_threshold(last_activity) {
            debug!("stored session idle past threshold; purging silently");
            self.store.clear_all();
            return false;
        }

        let identity: Identity = match self
            .store
            .identity_json()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(identity) => identity,
            None => {
                debug!("stored identity missing or unparseable; purging");
                self.store.clear_all();
                return false;
            }
        };

        let role = Role::normalize(self.store.role().as_deref().unwrap_or(""));
        *self.session.write().expect("session lock poisoned") = Some(Session {
            identity,
            role,
            token,
            last_activity,
        });
        self.set_state(SessionState::LoggedIn);
        info!(role = role.as_str(), "session restored");
        true
    }

    /// Record user activity. No-op unless logged in.
    pub fn refresh_activity(&self, signal: ActivitySignal) {
        let mut guard = self.session.write().expect("session lock poisoned");
        if let Some(session) = guard.as_mut() {
            let now = Utc::now();
            session.last_activity = now;
            self.store.set_last_activity_millis(now.timestamp_millis());
            trace!(?signal, "activity refreshed");
        }
    }

    /// Change the active role. Only valid while logged in; the token and
    /// activity timestamp are untouched.
    pub fn switch_role(&self, role: Role) -> bool {
        let mut guard = self.session.write().expect("session lock poisoned");
        match guard.as_mut() {
            Some(session) => {
                session.role = role;
                self.store.set_role(role.as_str());
                info!(role = role.as_str(), "role switched");
                true
            }
            None => {
                warn!("switch_role ignored; not logged in");
                false
            }
        }
    }

    /// Explicit logout: purge persisted keys and in-memory identity. No
    /// navigation side effects beyond what the caller performs.
    pub fn logout(&self) {
        self.store.clear_all();
        *self.session.write().expect("session lock poisoned") = None;
        self.set_state(SessionState::LoggedOut);
        info!("logged out");
    }

    /// Start the periodic inactivity check. Idempotent while running.
    pub fn start_monitor(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().expect("monitor lock poisoned");
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.config.activity_check_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.check_inactivity();
            }
        }));
        debug!(interval_secs = interval.as_secs(), "inactivity monitor started");
    }

    /// Stop the periodic check deterministically (unmount analogue).
    pub fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().expect("monitor lock poisoned").take() {
            handle.abort();
            debug!("inactivity monitor stopped");
        }
    }

    /// One monitor tick: expire the session when idle past the threshold.
    /// The idle check and the session removal share one write-lock critical
    /// section, so an activity refresh can never land between them and be
    /// lost. Keys are purged before navigation is requested.
    fn check_inactivity(&self) {
        {
            let mut guard = self.session.write().expect("session lock poisoned");
            let expired = guard
                .as_ref()
                .is_some_and(|session| self.idle_beyond_threshold(session.last_activity));
            if !expired {
                return;
            }
            *guard = None;
        }

        warn!("session expired from inactivity");
        self.store.clear_all();
        self.set_state(SessionState::Expired);
        self.navigator.goto(EXPIRED_LOGIN_PATH);
        self.events.emit(ClientEvent::SessionExpired);
    }

    fn idle_beyond_threshold(&self, last_activity: DateTime<Utc>) -> bool {
        let threshold = ChronoDuration::from_std(self.config.inactivity_timeout)
            .unwrap_or(ChronoDuration::MAX);
        Utc::now().signed_duration_since(last_activity) > threshold
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }
}
