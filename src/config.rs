// SPDX-License-Identifier: MIT
//! Client configuration.
//!
//! All knobs have built-in defaults matching the production dashboard.
//! Priority (highest to lowest): environment variable > explicit setter >
//! built-in default.

use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_ACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// ─── RetryPolicy ──────────────────────────────────────────────────────────────

/// Bounded exponential backoff for the HTTP request client.
///
/// A fresh attempt counter is created per logical request; retry `n`
/// (1-indexed) waits `base_delay × 2^(n-1)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    ///
    /// Default: 3 (4 attempts total)
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    ///
    /// Default: 1000 ms
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Policy suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    /// Backoff delay before retry `n` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

// ─── ReconnectPolicy ──────────────────────────────────────────────────────────

/// Bounded reconnection for the realtime channel: fixed attempt cap, fixed
/// delay between attempts. The attempt budget resets after every successful
/// connect, so the cap bounds *consecutive* failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed connect attempts before the channel gives up and
    /// stays disconnected until `connect()` is called again.
    ///
    /// Default: 5
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    ///
    /// Default: 1 s
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Policy suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        }
    }
}

// ─── ClientConfig ─────────────────────────────────────────────────────────────

/// Top-level configuration shared by the request client, session manager and
/// realtime channel.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL prefixed to every endpoint (`CHARGELINK_API_URL` env var).
    pub api_base_url: String,
    /// Realtime WebSocket URL (`CHARGELINK_SOCKET_URL` env var).
    pub socket_url: String,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
    /// HTTP retry/backoff policy.
    pub retry: RetryPolicy,
    /// Realtime reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Cool-down window for the debounced rate-limit notice.
    pub rate_limit_window: Duration,
    /// Idle time after which a logged-in session expires.
    pub inactivity_timeout: Duration,
    /// How often the session monitor checks for inactivity.
    pub activity_check_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            activity_check_interval: DEFAULT_ACTIVITY_CHECK_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env_non_empty("CHARGELINK_API_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = env_non_empty("CHARGELINK_SOCKET_URL") {
            config.socket_url = url;
        }
        config
    }

    /// Full URL for an API endpoint: `<api_base_url><endpoint>`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), endpoint)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
