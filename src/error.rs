// SPDX-License-Identifier: MIT
//! Error taxonomy for the connectivity layer.
//!
//! Only two failure classes are ever returned as `Err` from the request
//! client: `Unauthorized` (401/403, after session invalidation) and
//! `Network` (transport-level failure that survived the retry budget).
//! Every other HTTP status, 429 included, is handed back to the caller as an
//! ordinary non-ok [`ApiResponse`](crate::http::ApiResponse). Realtime
//! channel errors are never surfaced at all; they are absorbed by the
//! reconnection policy.

use thiserror::Error;

/// Transport-level failure (connection refused, DNS, timeout, malformed
/// response body). Distinct from an HTTP response with an error status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying HTTP client failure.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection-level failure (refused, reset, DNS).
    #[error("connection failed: {0}")]
    Connect(String),

    /// Response body could not be decoded.
    #[error("invalid response body: {0}")]
    Body(String),
}

/// Failures surfaced by [`RequestClient`](crate::http::RequestClient).
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/403: the server rejected the credential. The session has already
    /// been invalidated and the navigation target set to `/login` by the
    /// time this is returned.
    #[error("unauthorized")]
    Unauthorized,

    /// Transport-level failure after exhausting the retry budget.
    #[error("network error after {attempts} attempts: {source}")]
    Network {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Request body could not be serialized.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Realtime channel failures. Handled entirely inside the reconnection
/// policy; consumers only ever observe the connection-state flag.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connect handshake could not be built or completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Frame could not be parsed as a known wire event.
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// The socket closed while the channel expected it to be open.
    #[error("connection closed")]
    Closed,
}
