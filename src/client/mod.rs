//! Client-side connection manager
//!
//! One manager owns at most one connection to the control server. The
//! connection is opened lazily when the first listener subscribes and torn
//! down when the last one leaves. While listeners remain, a dropped
//! connection is retried on a fixed delay, and a capacity rejection backs
//! off for longer.

pub mod identity;
pub mod transport;

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::websocket::{PING, PONG};
use crate::types::EventMessage;

pub use identity::{generate_client_id, load_or_create};
pub use transport::{Connector, Frame, Transport, WsConnector, CLOSE_CAPACITY_EXCEEDED};

/// Connection lifecycle as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Lost the connection, retrying after `reconnect_delay`
    Reconnecting,
    /// Several attempts in a row failed; still retrying
    Disconnected,
    /// Server at capacity; retrying after `capacity_retry_delay`
    Rejected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Rejected => "rejected",
        }
    }
}

/// What a listener is called with
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State(ConnectionState),
    Message(EventMessage),
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://` or `wss://` base URL of the control server
    pub server_url: String,
    /// Period of the outbound `"ping"`, the first one sent on open
    ///
    /// The server expires a session silent for more than its `pingTimeout`
    /// (30s by default), checked every `sweepIntervalSecs`. With the 30s
    /// default here a ping that is a few milliseconds late can meet a sweep
    /// and the session is dropped and re-registered. Set this below the
    /// server's `pingTimeout` (`MCP_HEARTBEAT_SECS`) where that matters.
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// Back-off after the server closes with 1013 (at capacity)
    pub capacity_retry_delay: Duration,
    /// Consecutive failed attempts before reporting `Disconnected`
    pub max_silent_failures: u32,
    pub identity_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            capacity_retry_delay: Duration::from_secs(60),
            max_silent_failures: 3,
            identity_file: PathBuf::from(identity::DEFAULT_IDENTITY_FILE),
        }
    }
}

impl ClientConfig {
    /// Defaults with `MCP_SERVER_URL`, `MCP_CLIENT_ID_FILE` and
    /// `MCP_HEARTBEAT_SECS` applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("MCP_SERVER_URL") {
            config.server_url = url;
        }
        config.identity_file = identity::default_identity_path();
        if let Some(secs) = std::env::var("MCP_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config
    }
}

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Shared {
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    /// Present while a connection task exists, connected or waiting to retry
    task: Option<JoinHandle<()>>,
    state: ConnectionState,
}

struct Inner {
    client_id: String,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
}

/// Shared handle to one client connection; clones refer to the same connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Keeps a listener subscribed; dropping it unsubscribes
#[must_use = "dropping the guard removes the listener"]
pub struct ListenerGuard {
    id: u64,
    manager: Weak<Inner>,
}

impl ListenerGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Explicitly unsubscribe
    pub fn unsubscribe(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.remove_listener(self.id);
        }
    }
}

enum Ended {
    Dropped,
    Rejected,
}

impl ConnectionManager {
    pub fn new<C: Connector>(client_id: impl Into<String>, config: ClientConfig, connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                client_id: client_id.into(),
                config,
                connector: Arc::new(connector),
                shared: Mutex::new(Shared {
                    listeners: Vec::new(),
                    next_listener_id: 1,
                    task: None,
                    state: ConnectionState::Disconnected,
                }),
            }),
        }
    }

    /// WebSocket manager for `config.server_url`
    pub fn websocket(client_id: impl Into<String>, config: ClientConfig) -> Self {
        let connector = WsConnector::new(config.server_url.clone());
        Self::new(client_id, config, connector)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Whether a connection task exists
    pub fn is_running(&self) -> bool {
        self.inner.shared.lock().task.is_some()
    }

    /// Start the connection task unless one already exists
    ///
    /// Outside a Tokio runtime this logs and does nothing; listeners stay
    /// registered and a later call from inside a runtime connects.
    pub fn connect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.task.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(client_id = %self.inner.client_id, "connect called outside a Tokio runtime");
            return;
        };
        debug!(client_id = %self.inner.client_id, "starting connection task");
        shared.task = Some(runtime.spawn(run_connection(Arc::clone(&self.inner))));
    }

    /// Stop the connection task, keeping listeners registered
    pub fn disconnect(&self) {
        let task = {
            let mut shared = self.inner.shared.lock();
            shared.state = ConnectionState::Disconnected;
            shared.task.take()
        };
        if let Some(task) = task {
            task.abort();
            info!(client_id = %self.inner.client_id, "connection closed");
        }
    }

    /// Subscribe `listener`; the first listener opens the connection
    pub fn add_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut shared = self.inner.shared.lock();
            let id = shared.next_listener_id;
            shared.next_listener_id += 1;
            shared.listeners.push((id, Arc::new(listener)));
            id
        };
        self.connect();
        ListenerGuard {
            id,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Unsubscribe by id; removing the last listener closes the connection
    pub fn remove_listener(&self, id: u64) -> bool {
        self.inner.remove_listener(id)
    }
}

impl Inner {
    fn remove_listener(&self, id: u64) -> bool {
        let (removed, task) = {
            let mut shared = self.shared.lock();
            let before = shared.listeners.len();
            shared.listeners.retain(|(listener_id, _)| *listener_id != id);
            let removed = shared.listeners.len() != before;
            let task = if removed && shared.listeners.is_empty() {
                shared.state = ConnectionState::Disconnected;
                shared.task.take()
            } else {
                None
            };
            (removed, task)
        };
        if let Some(task) = task {
            task.abort();
            debug!(client_id = %self.client_id, "last listener removed, connection closed");
        }
        removed
    }

    fn emit(&self, event: ClientEvent) {
        let listeners: Vec<Listener> = self
            .shared
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut shared = self.shared.lock();
            if shared.state == state {
                return;
            }
            shared.state = state;
        }
        debug!(client_id = %self.client_id, state = state.as_str(), "connection state");
        self.emit(ClientEvent::State(state));
    }

    /// Clears the task slot and returns true when nobody is listening
    fn finish_if_unobserved(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.listeners.is_empty() {
            shared.task = None;
            shared.state = ConnectionState::Disconnected;
            true
        } else {
            false
        }
    }
}

async fn run_connection(inner: Arc<Inner>) {
    let mut failures: u32 = 0;
    let mut attempted = false;

    loop {
        if !attempted {
            inner.set_state(ConnectionState::Connecting);
        }
        attempted = true;

        let delay = match inner.connector.connect(&inner.client_id).await {
            Ok(transport) => {
                failures = 0;
                inner.set_state(ConnectionState::Connected);
                info!(client_id = %inner.client_id, "connected");
                match drive(&inner, transport).await {
                    Ended::Dropped => {
                        inner.set_state(ConnectionState::Reconnecting);
                        inner.config.reconnect_delay
                    }
                    Ended::Rejected => {
                        warn!(client_id = %inner.client_id, "server at capacity");
                        inner.set_state(ConnectionState::Rejected);
                        inner.config.capacity_retry_delay
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(client_id = %inner.client_id, attempt = failures, error = %e, "connect failed");
                if failures >= inner.config.max_silent_failures {
                    inner.set_state(ConnectionState::Disconnected);
                } else {
                    inner.set_state(ConnectionState::Reconnecting);
                }
                inner.config.reconnect_delay
            }
        };

        if inner.finish_if_unobserved() {
            return;
        }
        tokio::time::sleep(delay).await;
        if inner.finish_if_unobserved() {
            return;
        }
    }
}

/// Pump one open transport until it ends
async fn drive(inner: &Inner, mut transport: Box<dyn Transport>) -> Ended {
    let mut heartbeat = interval(inner.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(e) = transport.send_text(PING.to_string()).await {
                    debug!(client_id = %inner.client_id, error = %e, "heartbeat failed");
                    return Ended::Dropped;
                }
            }
            frame = transport.next_frame() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    if text == PONG {
                        continue;
                    }
                    match serde_json::from_str::<EventMessage>(&text) {
                        Ok(msg) => inner.emit(ClientEvent::Message(msg)),
                        Err(e) => debug!(error = %e, "ignoring unrecognized frame"),
                    }
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    debug!(client_id = %inner.client_id, code, reason = %reason, "server closed connection");
                    if code == CLOSE_CAPACITY_EXCEEDED {
                        return Ended::Rejected;
                    }
                    return Ended::Dropped;
                }
                Some(Err(e)) => {
                    debug!(client_id = %inner.client_id, error = %e, "transport error");
                    return Ended::Dropped;
                }
                None => return Ended::Dropped,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionEvent, ControlError, ControlResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Server side of one fake connection
    struct ServerEnd {
        to_client: mpsc::UnboundedSender<Frame>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    struct FakeTransport {
        inbound: mpsc::UnboundedReceiver<Frame>,
        outbound: mpsc::UnboundedSender<String>,
        open: Arc<AtomicUsize>,
    }

    impl Drop for FakeTransport {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_text(&mut self, text: String) -> ControlResult<()> {
            self.outbound
                .send(text)
                .map_err(|_| ControlError::Transport("closed".into()))
        }

        async fn next_frame(&mut self) -> Option<ControlResult<Frame>> {
            self.inbound.recv().await.map(Ok)
        }
    }

    #[derive(Clone)]
    struct FakeConnector {
        open: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        refuse: Arc<std::sync::atomic::AtomicBool>,
        accepted: mpsc::UnboundedSender<ServerEnd>,
    }

    impl FakeConnector {
        fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (accepted, rx) = mpsc::unbounded_channel();
            (
                Self {
                    open: Arc::new(AtomicUsize::new(0)),
                    attempts: Arc::new(AtomicUsize::new(0)),
                    refuse: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                    accepted,
                },
                rx,
            )
        }

        fn open(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _client_id: &str) -> ControlResult<Box<dyn Transport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ControlError::Transport("connection refused".into()));
            }
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.open.fetch_add(1, Ordering::SeqCst);
            let _ = self.accepted.send(ServerEnd {
                to_client,
                from_client,
            });
            Ok(Box::new(FakeTransport {
                inbound,
                outbound,
                open: self.open.clone(),
            }))
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<ClientEvent>>>, impl Fn(&ClientEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event: &ClientEvent| sink.lock().push(event.clone()))
    }

    fn event_frame(seq: u64) -> Frame {
        let msg = EventMessage {
            event: ConnectionEvent::ClientListUpdate { clients: vec![] },
            sequence_id: seq,
            timestamp: 0,
        };
        Frame::Text(serde_json::to_string(&msg).unwrap())
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_no_transport() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());

        let guard = manager.add_listener(|_| {});
        let _server = accepted.recv().await.unwrap();
        assert_eq!(connector.open(), 1);

        drop(guard);
        assert!(!manager.is_running());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.open(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());

        let _a = manager.add_listener(|_| {});
        let _b = manager.add_listener(|_| {});
        manager.connect();
        manager.connect();
        let _server = accepted.recv().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.open(), 1);
    }

    #[tokio::test]
    async fn test_connection_outlives_all_but_last_listener() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());

        let a = manager.add_listener(|_| {});
        let b = manager.add_listener(|_| {});
        let _server = accepted.recv().await.unwrap();

        assert!(manager.remove_listener(a.id()));
        assert!(manager.is_running());
        assert!(!manager.remove_listener(a.id()));
        drop(a);

        b.unsubscribe();
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_heartbeat_and_events_reach_listeners_in_order() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector);
        let (seen_a, listener_a) = recorder();
        let (seen_b, listener_b) = recorder();
        let _a = manager.add_listener(listener_a);
        let _b = manager.add_listener(listener_b);

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.from_client.recv().await.unwrap(), PING);

        server.to_client.send(Frame::Text(PONG.into())).unwrap();
        server.to_client.send(event_frame(7)).unwrap();
        server.to_client.send(event_frame(8)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for seen in [&seen_a, &seen_b] {
            let seqs: Vec<u64> = seen
                .lock()
                .iter()
                .filter_map(|event| match event {
                    ClientEvent::Message(msg) => Some(msg.sequence_id),
                    _ => None,
                })
                .collect();
            assert_eq!(seqs, vec![7, 8]);
            assert!(seen
                .lock()
                .contains(&ClientEvent::State(ConnectionState::Connected)));
        }
    }

    #[test]
    fn test_add_listener_outside_runtime_does_not_panic() {
        let (connector, _accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());

        let guard = manager.add_listener(|_| {});
        manager.connect();
        assert!(!manager.is_running());
        assert_eq!(connector.attempts(), 0);
        drop(guard);
    }

    #[tokio::test]
    async fn test_connect_inside_runtime_after_outside_attempt() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());

        let outside = manager.clone();
        let guard = std::thread::spawn(move || outside.add_listener(|_| {}))
            .join()
            .unwrap();
        assert!(!manager.is_running());

        manager.connect();
        let _server = accepted.recv().await.unwrap();
        assert_eq!(connector.open(), 1);
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());
        let (seen, listener) = recorder();
        let _guard = manager.add_listener(listener);

        let server = accepted.recv().await.unwrap();
        drop(server);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(seen
            .lock()
            .contains(&ClientEvent::State(ConnectionState::Reconnecting)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_rejection_backs_off() {
        let (connector, mut accepted) = FakeConnector::new();
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());
        let _guard = manager.add_listener(|_| {});

        let server = accepted.recv().await.unwrap();
        server
            .to_client
            .send(Frame::Close {
                code: CLOSE_CAPACITY_EXCEEDED,
                reason: "capacity exceeded".into(),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(manager.state(), ConnectionState::Rejected);
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_report_disconnected() {
        let (connector, _accepted) = FakeConnector::new();
        connector.refuse.store(true, Ordering::SeqCst);
        let manager = ConnectionManager::new("mcp-test", ClientConfig::default(), connector.clone());
        let (seen, listener) = recorder();
        let _guard = manager.add_listener(listener);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(!seen
            .lock()
            .contains(&ClientEvent::State(ConnectionState::Disconnected)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.is_running());
    }
}
