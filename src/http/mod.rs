// SPDX-License-Identifier: MIT
//! Authenticated HTTP request client with retry/backoff and rate-limit
//! handling.
//!
//! Status handling, in order:
//! - **401/403**: clear all persisted session keys, drop the in-memory
//!   session, set the navigation target to `/login`, return
//!   [`ApiError::Unauthorized`]. Never retried.
//! - **429**: emit at most one debounced [`ClientEvent::RateLimited`] per
//!   cool-down window, then hand the response back to the caller. Never
//!   retried.
//! - **408/500/502/503/504**: retry with exponential backoff up to the
//!   configured maximum; once exhausted the last failing response is
//!   returned as `Ok` for the caller to handle.
//! - anything else: returned immediately.
//!
//! Transport-level errors (no response at all) share the backoff budget and
//! surface as [`ApiError::Network`] once exhausted.

pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::{ClientEvent, ClientEvents, Navigator};
use crate::session::SharedSession;
use crate::store::SessionStore;

pub use transport::{HttpTransport, Method, ReqwestTransport, TransportRequest, TransportResponse};

/// Response handed back to callers. Non-ok statuses (429 included, after the
/// debounced notice) arrive here unchanged so calling code decides how to
/// react.
pub type ApiResponse = TransportResponse;

/// Statuses worth retrying: request timeout and transient server errors.
const RETRYABLE_STATUSES: [u16; 5] = [408, 500, 502, 503, 504];

/// Path the application is redirected to when the session is invalidated.
const LOGIN_PATH: &str = "/login";

// ─── RequestOptions ───────────────────────────────────────────────────────────

/// Per-request options. The verbs fill in `method` and `body`; `request`
/// accepts the full set for callers that need extra headers.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Caller headers, merged on top of the defaults (caller wins).
    pub headers: Vec<(String, String)>,
    /// JSON body, encoded before the first attempt.
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            headers: Vec::new(),
            body: None,
        }
    }
}

// ─── RateLimitGate ────────────────────────────────────────────────────────────

/// Debounce state for the rate-limit notice: at most one notice per window,
/// however many 429s arrive inside it.
#[derive(Debug)]
struct RateLimitGate {
    shown_at: Option<Instant>,
    window: Duration,
}

impl RateLimitGate {
    fn new(window: Duration) -> Self {
        Self {
            shown_at: None,
            window,
        }
    }

    /// True when a notice should fire now; records the emission.
    fn try_emit(&mut self, now: Instant) -> bool {
        match self.shown_at {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                self.shown_at = Some(now);
                true
            }
        }
    }

    fn reset(&mut self) {
        self.shown_at = None;
    }
}

// ─── RequestClient ────────────────────────────────────────────────────────────

/// Authenticated HTTP client for the dashboard API.
pub struct RequestClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    store: SessionStore,
    session: SharedSession,
    navigator: Arc<Navigator>,
    events: ClientEvents,
    gate: Mutex<RateLimitGate>,
}

impl RequestClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: SessionStore,
        session: SharedSession,
        navigator: Arc<Navigator>,
        events: ClientEvents,
    ) -> Self {
        let gate = Mutex::new(RateLimitGate::new(config.rate_limit_window));
        Self {
            config,
            transport,
            store,
            session,
            navigator,
            events,
            gate,
        }
    }

    /// GET an endpoint.
    pub async fn get(&self, endpoint: &str) -> Result<ApiResponse, ApiError> {
        self.request(endpoint, RequestOptions::default()).await
    }

    /// POST a JSON body to an endpoint.
    pub async fn post(&self, endpoint: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.request(
            endpoint,
            RequestOptions {
                method: Method::Post,
                body: Some(body),
                ..RequestOptions::default()
            },
        )
        .await
    }

    /// PUT a JSON body to an endpoint.
    pub async fn put(&self, endpoint: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.request(
            endpoint,
            RequestOptions {
                method: Method::Put,
                body: Some(body),
                ..RequestOptions::default()
            },
        )
        .await
    }

    /// DELETE an endpoint.
    pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse, ApiError> {
        self.request(
            endpoint,
            RequestOptions {
                method: Method::Delete,
                ..RequestOptions::default()
            },
        )
        .await
    }

    /// Issue one logical request. Retries are strictly sequential: attempt
    /// n+1 starts only after attempt n has fully settled. The attempt
    /// counter is local to this call and never crosses requests.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let body = match options.body {
            Some(value) => Some(serde_json::to_string(&value)?),
            None => None,
        };
        let request = TransportRequest {
            method: options.method,
            url: self.config.endpoint_url(endpoint),
            headers: self.build_headers(&options.headers),
            body,
        };

        let max_retries = self.config.retry.max_retries;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.transport.execute(request.clone()).await {
                Ok(response) => {
                    if response.status == 401 || response.status == 403 {
                        warn!(
                            status = response.status,
                            endpoint, "credential rejected; invalidating session"
                        );
                        self.invalidate_session();
                        return Err(ApiError::Unauthorized);
                    }
                    if response.status == 429 {
                        self.notify_rate_limited(&response);
                        return Ok(response);
                    }
                    if RETRYABLE_STATUSES.contains(&response.status) && attempt <= max_retries {
                        let delay = self.config.retry.delay_for(attempt);
                        warn!(
                            status = response.status,
                            attempt,
                            max = max_retries,
                            delay_ms = delay.as_millis(),
                            endpoint,
                            "transient status; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if RETRYABLE_STATUSES.contains(&response.status) {
                        warn!(
                            status = response.status,
                            attempts = attempt,
                            endpoint,
                            "retry budget exhausted; returning last response"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt <= max_retries {
                        let delay = self.config.retry.delay_for(attempt);
                        warn!(
                            attempt,
                            max = max_retries,
                            delay_ms = delay.as_millis(),
                            endpoint,
                            err = %err,
                            "network error; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(attempts = attempt, endpoint, err = %err, "network error; giving up");
                    return Err(ApiError::Network {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// Forget the debounce state so the next 429 notifies immediately.
    pub fn reset_rate_limit_notice(&self) {
        self.gate.lock().expect("gate lock poisoned").reset();
    }

    /// Default headers with the caller's merged on top (caller wins).
    fn build_headers(&self, caller: &[(String, String)]) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::with_capacity(caller.len() + 2);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        if let Some(token) = self.store.token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        for (name, value) in caller {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }

    /// 401/403 handling. Persisted keys are cleared first so a reloaded
    /// login view never observes stale credentials, then the in-memory
    /// session is dropped, then navigation is requested.
    fn invalidate_session(&self) {
        self.store.clear_all();
        *self.session.write().expect("session lock poisoned") = None;
        self.navigator.goto(LOGIN_PATH);
        self.events.emit(ClientEvent::Unauthorized);
    }

    /// Debounced 429 notice. Subsequent 429s inside the window are silent.
    fn notify_rate_limited(&self, response: &ApiResponse) {
        let retry_after_secs = response.json_value().get("retryAfter").and_then(Value::as_u64);
        let emit = self
            .gate
            .lock()
            .expect("gate lock poisoned")
            .try_emit(Instant::now());
        if emit {
            warn!(?retry_after_secs, "rate limited by server");
            self.events.emit(ClientEvent::RateLimited { retry_after_secs });
        } else {
            debug!("rate limited again inside notice window; suppressed");
        }
    }
}
