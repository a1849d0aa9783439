//! Duplex socket seam.
//!
//! The channel worker drives connections through [`SocketConnector`] /
//! [`SocketLink`] so reconnection and resubscription are testable with
//! scripted links. [`WsConnector`] is the production implementation over
//! tokio-tungstenite; the session token rides on the upgrade request as an
//! `Authorization: Bearer` header.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ChannelError;
use crate::realtime::proto::{ClientCommand, ServerEvent};

/// One open duplex connection.
#[async_trait]
pub trait SocketLink: Send {
    /// Send an outbound command frame.
    async fn send(&mut self, command: &ClientCommand) -> Result<(), ChannelError>;

    /// Next inbound domain event. `None` means the peer closed cleanly;
    /// `Some(Err(_))` means the link failed. Unknown or malformed frames are
    /// skipped, not surfaced.
    async fn next_event(&mut self) -> Option<Result<ServerEvent, ChannelError>>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Opens [`SocketLink`]s.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn SocketLink>, ChannelError>;
}

// ─── WebSocket implementation ─────────────────────────────────────────────────

/// Production connector over tokio-tungstenite.
#[derive(Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn SocketLink>, ChannelError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ChannelError::Handshake(e.to_string()))?;
        if let Some(token) = token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| ChannelError::Handshake("token is not header-safe".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) = connect_async(request).await?;
        Ok(Box::new(WsLink { socket }))
    }
}

struct WsLink {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketLink for WsLink {
    async fn send(&mut self, command: &ClientCommand) -> Result<(), ChannelError> {
        let text = serde_json::to_string(command)?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<ServerEvent, ChannelError>> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(err) => {
                        // Tolerate frames this client does not know about.
                        debug!(err = %err, "skipping unrecognized frame");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if self.socket.send(Message::Pong(payload)).await.is_err() {
                        return Some(Err(ChannelError::Closed));
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Some(Err(ChannelError::WebSocket(err))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
