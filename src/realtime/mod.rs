// SPDX-License-Identifier: MIT
//! Reconnecting realtime charger-event channel.
//!
//! One background worker owns the socket. The subscription set is client
//! intent, independent of transport state: it survives disconnects, re-adds
//! are no-ops, and every successful connect replays exactly one
//! `subscribe:charger` per member (resubscribing to an already-subscribed
//! topic is harmless server-side). Connection failures never reach the
//! consumer. The worker retries with a fixed delay up to a fixed attempt
//! cap and then parks in an observable disconnected state until `connect()`
//! is called again.

pub mod proto;
pub mod transport;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::store::SessionStore;

pub use proto::{ChargerStatus, ClientCommand, MeterValues, ServerEvent, TransactionEvent};
pub use transport::{SocketConnector, SocketLink, WsConnector};

/// Bounded ordered log of recently observed events, newest first.
pub const EVENT_LOG_CAP: usize = 50;

/// Fan-out events for channel consumers. Dropping the receiver detaches.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Event(ServerEvent),
}

#[derive(Default)]
struct ChannelState {
    connected: bool,
    last_update: Option<DateTime<Utc>>,
    /// Last-value-wins per charger.
    latest: HashMap<String, ServerEvent>,
    /// Newest first, capped at [`EVENT_LOG_CAP`].
    event_log: VecDeque<ServerEvent>,
}

enum WorkerCommand {
    Send(ClientCommand),
    Shutdown,
}

struct Worker {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    handle: JoinHandle<()>,
}

// ─── Channel ──────────────────────────────────────────────────────────────────

pub struct RealtimeChannel {
    config: ClientConfig,
    connector: Arc<dyn SocketConnector>,
    store: SessionStore,
    state: Arc<RwLock<ChannelState>>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    bus: broadcast::Sender<ChannelEvent>,
    worker: Mutex<Option<Worker>>,
}

impl RealtimeChannel {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn SocketConnector>,
        store: SessionStore,
    ) -> Self {
        let (bus, _) = broadcast::channel(256);
        Self {
            config,
            connector,
            store,
            state: Arc::new(RwLock::new(ChannelState::default())),
            subscriptions: Arc::new(Mutex::new(BTreeSet::new())),
            bus,
            worker: Mutex::new(None),
        }
    }

    /// Open the connection with the current session token and start the
    /// bounded reconnection worker. Calling again replaces a previous
    /// worker, including one that exhausted its attempt cap.
    pub fn connect(&self) {
        let mut guard = self.worker.lock().expect("worker lock poisoned");
        if let Some(worker) = guard.take() {
            let _ = worker.tx.send(WorkerCommand::Shutdown);
            worker.handle.abort();
            mark_disconnected(&self.state, &self.bus);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkerCtx {
            url: self.config.socket_url.clone(),
            connector: Arc::clone(&self.connector),
            store: self.store.clone(),
            state: Arc::clone(&self.state),
            subscriptions: Arc::clone(&self.subscriptions),
            bus: self.bus.clone(),
            policy: self.config.reconnect.clone(),
        };
        let handle = tokio::spawn(worker_loop(ctx, rx));
        *guard = Some(Worker { tx, handle });
    }

    /// Close the connection and stop reconnecting. The subscription set is
    /// kept; a later `connect()` resubscribes everything.
    pub fn disconnect(&self) {
        if let Some(worker) = self.worker.lock().expect("worker lock poisoned").take() {
            let _ = worker.tx.send(WorkerCommand::Shutdown);
            worker.handle.abort();
        }
        mark_disconnected(&self.state, &self.bus);
    }

    /// Track a charger. Re-adding an already-tracked topic is a no-op; when
    /// connected the wire command goes out immediately, otherwise set
    /// membership realizes the intent on the next connect.
    pub fn subscribe(&self, charger_id: &str) {
        let inserted = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(charger_id.to_string());
        if !inserted {
            debug!(charger_id, "already subscribed");
            return;
        }
        self.send_if_connected(ClientCommand::subscribe(charger_id));
    }

    /// Stop tracking a charger.
    pub fn unsubscribe(&self, charger_id: &str) {
        let removed = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(charger_id);
        if !removed {
            return;
        }
        self.send_if_connected(ClientCommand::unsubscribe(charger_id));
    }

    /// Current connection flag for UI consumption.
    pub fn is_connected(&self) -> bool {
        self.state.read().expect("state lock poisoned").connected
    }

    /// When the last inbound event was recorded.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("state lock poisoned").last_update
    }

    /// Latest event observed for a charger (last-value-wins).
    pub fn latest(&self, charger_id: &str) -> Option<ServerEvent> {
        self.state
            .read()
            .expect("state lock poisoned")
            .latest
            .get(charger_id)
            .cloned()
    }

    /// Snapshot of the event log, newest first.
    pub fn events(&self) -> Vec<ServerEvent> {
        self.state
            .read()
            .expect("state lock poisoned")
            .event_log
            .iter()
            .cloned()
            .collect()
    }

    /// Currently tracked chargers.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Receive connection-state changes and inbound domain events. Dropping
    /// the receiver detaches the observer.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.bus.subscribe()
    }

    fn send_if_connected(&self, command: ClientCommand) {
        if !self.is_connected() {
            return;
        }
        if let Some(worker) = self.worker.lock().expect("worker lock poisoned").as_ref() {
            // A command racing a disconnect is dropped by the worker; set
            // membership is the source of truth and is replayed on connect.
            let _ = worker.tx.send(WorkerCommand::Send(command));
        }
    }
}

fn mark_disconnected(state: &Arc<RwLock<ChannelState>>, bus: &broadcast::Sender<ChannelEvent>) {
    let was_connected = {
        let mut guard = state.write().expect("state lock poisoned");
        std::mem::replace(&mut guard.connected, false)
    };
    if was_connected {
        let _ = bus.send(ChannelEvent::Disconnected);
    }
}

// ─── Worker ───────────────────────────────────────────────────────────────────

struct WorkerCtx {
    url: String,
    connector: Arc<dyn SocketConnector>,
    store: SessionStore,
    state: Arc<RwLock<ChannelState>>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    bus: broadcast::Sender<ChannelEvent>,
    policy: ReconnectPolicy,
}

impl WorkerCtx {
    fn mark_connected(&self) {
        self.state.write().expect("state lock poisoned").connected = true;
        let _ = self.bus.send(ChannelEvent::Connected);
    }

    fn record(&self, event: ServerEvent) {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            state
                .latest
                .insert(event.charger_id().to_string(), event.clone());
            state.event_log.push_front(event.clone());
            state.event_log.truncate(EVENT_LOG_CAP);
            state.last_update = Some(Utc::now());
        }
        let _ = self.bus.send(ChannelEvent::Event(event));
    }
}

enum SessionEnd {
    /// Link failed or closed; reconnect.
    Lost,
    /// Consumer asked for teardown; exit the worker.
    Shutdown,
}

async fn worker_loop(ctx: WorkerCtx, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    // Consecutive failed connect attempts; resets on every success.
    let mut failures: u32 = 0;

    loop {
        let token = ctx.store.token();
        match ctx.connector.connect(&ctx.url, token.as_deref()).await {
            Ok(mut link) => {
                failures = 0;
                info!(url = %ctx.url, "realtime connected");
                ctx.mark_connected();

                let end = run_session(link.as_mut(), &mut rx, &ctx).await;
                link.close().await;
                mark_disconnected(&ctx.state, &ctx.bus);
                match end {
                    SessionEnd::Shutdown => {
                        debug!("realtime worker shut down");
                        return;
                    }
                    SessionEnd::Lost => warn!("realtime link lost; reconnecting"),
                }
            }
            Err(err) => {
                failures += 1;
                warn!(
                    err = %err,
                    attempt = failures,
                    max = ctx.policy.max_attempts,
                    "realtime connect failed"
                );
                if failures >= ctx.policy.max_attempts {
                    warn!("reconnect attempt cap reached; staying disconnected");
                    return;
                }
            }
        }

        if sleep_or_shutdown(ctx.policy.delay, &mut rx).await {
            return;
        }
    }
}

/// Drive one connected session: replay subscriptions, then multiplex
/// outbound commands and inbound events until the link drops or the
/// consumer shuts down.
async fn run_session(
    link: &mut dyn SocketLink,
    rx: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    ctx: &WorkerCtx,
) -> SessionEnd {
    // Idempotent resubscription: one command per tracked topic, exactly once
    // per connect, however many reconnects preceded it.
    let topics: Vec<String> = ctx
        .subscriptions
        .lock()
        .expect("subscriptions lock poisoned")
        .iter()
        .cloned()
        .collect();
    for charger_id in &topics {
        if link.send(&ClientCommand::subscribe(charger_id)).await.is_err() {
            return SessionEnd::Lost;
        }
    }
    if !topics.is_empty() {
        debug!(count = topics.len(), "resubscribed tracked chargers");
    }

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(WorkerCommand::Send(command)) => {
                    if link.send(&command).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Some(WorkerCommand::Shutdown) | None => return SessionEnd::Shutdown,
            },
            event = link.next_event() => match event {
                Some(Ok(event)) => ctx.record(event),
                Some(Err(err)) => {
                    debug!(err = %err, "realtime link error");
                    return SessionEnd::Lost;
                }
                None => return SessionEnd::Lost,
            },
        }
    }
}

/// Wait out the reconnect delay, still reacting to shutdown. Returns `true`
/// when the worker should exit.
async fn sleep_or_shutdown(
    delay: Duration,
    rx: &mut mpsc::UnboundedReceiver<WorkerCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            command = rx.recv() => match command {
                // Intent already lives in the set; replayed on connect.
                Some(WorkerCommand::Send(_)) => {}
                Some(WorkerCommand::Shutdown) | None => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status_event(charger_id: &str, status: &str) -> ServerEvent {
        ServerEvent::ChargerStatusUpdate(ChargerStatus {
            charger_id: charger_id.to_string(),
            status: status.to_string(),
            connector_id: None,
            error_code: None,
            timestamp: Utc::now(),
        })
    }

    /// One scripted connection: canned inbound events, then either a clean
    /// close or an open link that idles forever.
    struct ScriptedSession {
        events: Vec<ServerEvent>,
        close_after_events: bool,
    }

    struct MockConnector {
        sessions: Mutex<VecDeque<ScriptedSession>>,
        connect_calls: AtomicU32,
        /// (connect index, command) for every outbound command.
        sent: Arc<Mutex<Vec<(u32, ClientCommand)>>>,
    }

    impl MockConnector {
        fn new(sessions: Vec<ScriptedSession>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into()),
                connect_calls: AtomicU32::new(0),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn sent(&self) -> Vec<(u32, ClientCommand)> {
            self.sent.lock().unwrap().clone()
        }

        fn push_session(&self, session: ScriptedSession) {
            self.sessions.lock().unwrap().push_back(session);
        }

        fn connect_calls(&self) -> u32 {
            self.connect_calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl SocketConnector for MockConnector {
        async fn connect(
            &self,
            _url: &str,
            _token: Option<&str>,
        ) -> Result<Box<dyn SocketLink>, ChannelError> {
            let index = self.connect_calls.fetch_add(1, Ordering::Relaxed);
            match self.sessions.lock().unwrap().pop_front() {
                Some(session) => Ok(Box::new(MockLink {
                    index,
                    events: session.events.into(),
                    close_after_events: session.close_after_events,
                    sent: self.sent.clone(),
                })),
                None => Err(ChannelError::Closed),
            }
        }
    }

    struct MockLink {
        index: u32,
        events: VecDeque<ServerEvent>,
        close_after_events: bool,
        sent: Arc<Mutex<Vec<(u32, ClientCommand)>>>,
    }

    #[async_trait]
    impl SocketLink for MockLink {
        async fn send(&mut self, command: &ClientCommand) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push((self.index, command.clone()));
            Ok(())
        }

        async fn next_event(&mut self) -> Option<Result<ServerEvent, ChannelError>> {
            if let Some(event) = self.events.pop_front() {
                return Some(Ok(event));
            }
            if self.close_after_events {
                return None;
            }
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn channel(connector: Arc<MockConnector>) -> RealtimeChannel {
        let config = ClientConfig {
            reconnect: ReconnectPolicy::instant(),
            ..ClientConfig::default()
        };
        RealtimeChannel::new(config, connector, SessionStore::in_memory())
    }

    fn open_session(events: Vec<ServerEvent>) -> ScriptedSession {
        ScriptedSession {
            events,
            close_after_events: false,
        }
    }

    fn closing_session(events: Vec<ServerEvent>) -> ScriptedSession {
        ScriptedSession {
            events,
            close_after_events: true,
        }
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

    #[tokio::test]
    async fn resubscribing_a_tracked_topic_is_a_noop() {
        let channel = channel(MockConnector::new(vec![]));
        channel.subscribe("CH-1");
        channel.subscribe("CH-1");
        assert_eq!(channel.subscriptions(), vec!["CH-1".to_string()]);
    }

    #[tokio::test]
    async fn reconnect_replays_each_subscription_exactly_once() {
        let connector = MockConnector::new(vec![closing_session(vec![]), open_session(vec![])]);
        let channel = channel(connector.clone());
        channel.subscribe("CH-1");
        channel.subscribe("CH-2");

        channel.connect();
        wait_until(|| connector.sent().len() >= 4).await;
        wait_until(|| channel.is_connected()).await;

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
                ],
                "session {session} should replay each topic once"
            );
        }
        // Membership survived the disconnect.
        assert_eq!(channel.subscriptions().len(), 2);
        channel.disconnect();
    }

    #[tokio::test]
    async fn subscribe_while_connected_sends_the_wire_command() {
        let connector = MockConnector::new(vec![open_session(vec![])]);
        let channel = channel(connector.clone());

        channel.connect();
        wait_until(|| channel.is_connected()).await;

        channel.subscribe("CH-9");
        wait_until(|| connector.sent().contains(&(0, ClientCommand::subscribe("CH-9")))).await;

        channel.unsubscribe("CH-9");
        wait_until(|| {
            connector
                .sent()
                .contains(&(0, ClientCommand::unsubscribe("CH-9")))
        })
        .await;
        assert!(channel.subscriptions().is_empty());
        channel.disconnect();
    }

    #[tokio::test]
    async fn inbound_events_update_latest_map_and_log() {
        let events = vec![
            status_event("CH-1", "Available"),
            status_event("CH-1", "Charging"),
            status_event("CH-2", "Faulted"),
        ];
        let connector = MockConnector::new(vec![open_session(events)]);
        let channel = channel(connector);
        let mut rx = channel.subscribe_events();

        channel.connect();
        wait_until(|| channel.events().len() == 3).await;

        // Last-value-wins per charger.
        match channel.latest("CH-1").unwrap() {
            ServerEvent::ChargerStatusUpdate(status) => assert_eq!(status.status, "Charging"),
            other => panic!("wrong variant: {other:?}"),
        }
        // Newest first.
        assert_eq!(channel.events()[0].charger_id(), "CH-2");
        assert!(channel.last_update().is_some());

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Connected);
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Event(_)));
        channel.disconnect();
    }

    #[tokio::test]
    async fn event_log_evicts_beyond_cap() {
        let events: Vec<ServerEvent> = (0..60)
            .map(|i| status_event(&format!("CH-{i}"), "Available"))
            .collect();
        let connector = MockConnector::new(vec![open_session(events)]);
        let channel = channel(connector);

        channel.connect();
        wait_until(|| channel.events().len() == EVENT_LOG_CAP && channel.events()[0].charger_id() == "CH-59").await;

        let log = channel.events();
        assert_eq!(log.len(), 50);
        assert_eq!(log[0].charger_id(), "CH-59");
        assert_eq!(log[49].charger_id(), "CH-10");
        channel.disconnect();
    }

    #[tokio::test]
    async fn attempt_cap_parks_the_channel_until_connect_is_called_again() {
        let connector = MockConnector::new(vec![]);
        let channel = channel(connector.clone());
        channel.subscribe("CH-1");

        channel.connect();
        wait_until(|| connector.connect_calls() == 5).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(connector.connect_calls(), 5);
        assert!(!channel.is_connected());

        // A later explicit connect replaces the parked worker and replays
        // the subscription set.
        connector.push_session(open_session(vec![]));
        channel.connect();
        wait_until(|| channel.is_connected()).await;

        let commands: Vec<_> = connector
            .sent()
            .into_iter()
            .map(|(_, command)| command)
            .collect();
        assert_eq!(commands, vec![ClientCommand::subscribe("CH-1")]);
        channel.disconnect();
    }

    #[tokio::test]
    async fn disconnect_parks_the_channel() {
        let connector = MockConnector::new(vec![open_session(vec![])]);
        let channel = channel(connector.clone());

        channel.connect();
        wait_until(|| channel.is_connected()).await;

        channel.disconnect();
        assert!(!channel.is_connected());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(connector.connect_calls(), 1);
    }
}
