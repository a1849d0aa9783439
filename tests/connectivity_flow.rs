//! End-to-end flows over the public seams: login, authenticated requests
//! with retry, auth-failure invalidation and realtime resubscription.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chargelink::config::{ClientConfig, ReconnectPolicy, RetryPolicy};
use chargelink::error::{ChannelError, TransportError};
use chargelink::events::ClientEvent;
use chargelink::http::{HttpTransport, TransportRequest, TransportResponse};
use chargelink::realtime::{ClientCommand, ServerEvent, SocketConnector, SocketLink};
use chargelink::session::{Credentials, SessionState};
use chargelink::store::SessionStore;
use chargelink::ClientContext;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Route log output through the test harness; honors `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─── Test doubles ─────────────────────────────────────────────────────────────

struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResponse>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<TransportResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(request);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransportResponse {
                status: 200,
                body: "{}".to_string(),
            }))
    }
}

fn ok_json(body: serde_json::Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        body: body.to_string(),
    }
}

fn status(code: u16) -> TransportResponse {
    TransportResponse {
        status: code,
        body: String::new(),
    }
}

fn login_response() -> TransportResponse {
    ok_json(json!({
        "token": "tok-123",
        "user": {
            "id": "u-1",
            "name": "Dana",
            "email": "dana@example.com",
            "role": "Operator"
        }
    }))
}

/// Connector handing out link sessions that record outbound commands; a
/// session either closes after its canned events or idles open.
struct ScriptedConnector {
    sessions: Mutex<VecDeque<bool>>, // close_after flag per session
    connect_calls: AtomicU32,
    sent: Arc<Mutex<Vec<(u32, ClientCommand)>>>,
}

impl ScriptedConnector {
    fn new(sessions: Vec<bool>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            connect_calls: AtomicU32::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn sent(&self) -> Vec<(u32, ClientCommand)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(
        &self,
        _url: &str,
        _token: Option<&str>,
    ) -> Result<Box<dyn SocketLink>, ChannelError> {
        let index = self.connect_calls.fetch_add(1, Ordering::Relaxed);
        match self.sessions.lock().unwrap().pop_front() {
            Some(close_after) => Ok(Box::new(ScriptedLink {
                index,
                close_after,
                closed: false,
                sent: self.sent.clone(),
            })),
            None => Err(ChannelError::Closed),
        }
    }
}

struct ScriptedLink {
    index: u32,
    close_after: bool,
    closed: bool,
    sent: Arc<Mutex<Vec<(u32, ClientCommand)>>>,
}

#[async_trait]
impl SocketLink for ScriptedLink {
    async fn send(&mut self, command: &ClientCommand) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((self.index, command.clone()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<ServerEvent, ChannelError>> {
        if self.close_after && !self.closed {
            // Let the resubscription commands land first.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.closed = true;
            return None;
        }
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

fn test_config() -> ClientConfig {
    ClientConfig {
        retry: RetryPolicy::instant(),
        reconnect: ReconnectPolicy::instant(),
        ..ClientConfig::default()
    }
}

fn context(
    transport: Arc<ScriptedTransport>,
    connector: Arc<ScriptedConnector>,
) -> ClientContext {
    ClientContext::with_transports(test_config(), transport, connector, SessionStore::in_memory())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}

// ─── Flows ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_then_authenticated_request_with_retry() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        login_response(),
        status(503),
        ok_json(json!({"chargers": []})),
    ]);
    let ctx = context(transport.clone(), ScriptedConnector::new(vec![]));

    let outcome = ctx
        .session
        .login(&Credentials {
            email: "dana@example.com".to_string(),
            password: "hunter2".to_string(),
        })
        .await;
    assert!(outcome.is_success());
    assert_eq!(ctx.session.state(), SessionState::LoggedIn);
    assert_eq!(ctx.store.token().as_deref(), Some("tok-123"));

    let response = ctx.http.get("/chargers").await.unwrap();
    assert!(response.is_ok());

    // Login plus one failed and one successful charger fetch.
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    let bearer = calls[2]
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.as_str());
    assert_eq!(bearer, Some("Bearer tok-123"));
}

#[tokio::test]
async fn auth_failure_clears_the_session_and_redirects() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![login_response(), status(401)]);
    let ctx = context(transport, ScriptedConnector::new(vec![]));
    let mut rx = ctx.events.subscribe();

    ctx.session
        .login(&Credentials {
            email: "dana@example.com".to_string(),
            password: "hunter2".to_string(),
        })
        .await;
    assert!(ctx.session.current().is_some());

    let err = ctx.http.get("/chargers").await.unwrap_err();
    assert!(matches!(err, chargelink::error::ApiError::Unauthorized));

    assert!(ctx.store.is_empty());
    assert!(ctx.session.current().is_none());
    assert_eq!(ctx.navigator.target().as_deref(), Some("/login"));
    assert_eq!(rx.recv().await.unwrap(), ClientEvent::Unauthorized);
}

#[tokio::test]
async fn realtime_resubscribes_after_a_dropped_link() {
    init_tracing();
    let connector = ScriptedConnector::new(vec![true, false]);
    let ctx = context(ScriptedTransport::new(vec![]), connector.clone());

    ctx.realtime.subscribe("CH-1");
    ctx.realtime.subscribe("CH-2");
    ctx.realtime.connect();

    wait_until(|| connector.sent().len() >= 4).await;
    wait_until(|| ctx.realtime.is_connected()).await;

    for session in [0u32, 1u32] {
        let commands: Vec<_> = connector
            .sent()
            .into_iter()
            .filter(|(index, _)| *index == session)
            .map(|(_, command)| command)
            .collect();
        assert_eq!(
            commands,
            vec![
                ClientCommand::subscribe("CH-1"),
                ClientCommand::subscribe("CH-2"),
            ]
        );
    }
    ctx.realtime.disconnect();
    assert!(!ctx.realtime.is_connected());
}
