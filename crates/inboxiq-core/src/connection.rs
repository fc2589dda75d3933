//! Connection to the assistant backend.
//!
//! The manager owns exactly one transport at a time and at most one pending
//! reconnect timer. Transports and timers report back through a single event
//! channel which the front end drains on its event loop and feeds into
//! [`ConnectionManager::handle_event`]; the manager never interprets frame
//! contents itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::permission::FrameSink;

const STATUS_CONNECTING: &str = "Connecting...";
const STATUS_LOST: &str = "Connection lost. Reconnecting...";
const STATUS_ERROR: &str = "Connection error. Trying to reconnect...";
const STATUS_DISCONNECTED: &str = "Disconnected";

// Shared by every manager in the process, so a manager built for a new login
// never reuses an epoch that may still be queued from the previous one.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Dropped or failed; a reconnect is scheduled.
    Reconnecting,
    /// Torn down by `close()`; never reconnects on its own.
    Closed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "disconnected",
        }
    }
}

/// Transport and timer notifications. Every event carries the epoch of the
/// attempt it belongs to so late events from a replaced attempt (or an old
/// timer) can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { epoch: u64 },
    Frame { epoch: u64, text: String },
    Closed { epoch: u64, reason: Option<String> },
    Failed { epoch: u64, error: String },
    /// The reconnect delay after the attempt `epoch` dropped has elapsed.
    ReconnectDue { epoch: u64 },
}

/// A live (or still opening) transport. Dropping it tears it down.
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Transport {
    pub fn new(outbound: mpsc::UnboundedSender<String>, task: JoinHandle<()>) -> Self {
        Self { outbound, task }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub trait Connector {
    /// Starts one connection attempt. The transport must report `Opened`
    /// once the handshake succeeds, then `Frame`s, and finally one of
    /// `Closed` or `Failed`.
    fn open(&self, url: &str, epoch: u64, events: mpsc::UnboundedSender<ConnectionEvent>) -> Transport;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str, epoch: u64, events: mpsc::UnboundedSender<ConnectionEvent>) -> Transport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url.to_string(), epoch, events, outbound_rx));
        Transport::new(outbound_tx, task)
    }
}

async fn run_socket(
    url: String,
    epoch: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Failed {
                epoch,
                error: e.to_string(),
            });
            return;
        }
    };
    let _ = events.send(ConnectionEvent::Opened { epoch });

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame = ConnectionEvent::Frame { epoch, text: text.to_string() };
                    if events.send(frame).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    let _ = events.send(ConnectionEvent::Closed { epoch, reason });
                    break;
                }
                // Binary and control frames carry nothing for the chat.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ConnectionEvent::Failed { epoch, error: e.to_string() });
                    break;
                }
                None => {
                    let _ = events.send(ConnectionEvent::Closed { epoch, reason: None });
                    break;
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(payload) => {
                    if let Err(e) = write.send(Message::text(payload)).await {
                        let _ = events.send(ConnectionEvent::Failed { epoch, error: e.to_string() });
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// The backend endpoint for one user: the configured URL with a `user_id`
/// query parameter.
pub fn endpoint_for_user(ws_url: &str, user_id: &str) -> Result<String, ClientError> {
    let mut url = Url::parse(ws_url).map_err(|e| ClientError::Transport(format!("invalid backend URL {}: {}", ws_url, e)))?;
    url.query_pairs_mut().append_pair("user_id", user_id);
    Ok(url.to_string())
}

pub struct ConnectionManager<C: Connector = WsConnector> {
    connector: C,
    url: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    reconnect_delay: Duration,
    state: ConnectionState,
    status: Option<String>,
    epoch: u64,
    transport: Option<Transport>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        url: impl Into<String>,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            connector,
            url: url.into(),
            events,
            reconnect_delay,
            state: ConnectionState::Closed,
            status: None,
            epoch: 0,
            transport: None,
            reconnect_timer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// User-visible connection status; `None` while connected.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Epoch of the current (or last) attempt; 0 before the first `connect()`.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Starts a fresh connection attempt, replacing any previous transport.
    pub fn connect(&mut self) {
        self.cancel_reconnect();
        self.transport = None;
        self.epoch = next_epoch();
        self.state = ConnectionState::Connecting;
        self.status = Some(STATUS_CONNECTING.to_string());

        info!(epoch = self.epoch, url = %self.url, "connecting to assistant backend");
        self.transport = Some(self.connector.open(&self.url, self.epoch, self.events.clone()));
    }

    /// Tears the connection down for good. The pending reconnect timer is
    /// cancelled first so it cannot race a later login.
    pub fn close(&mut self) {
        self.cancel_reconnect();
        self.transport = None;
        // Anything still in flight from the old transport is now stale.
        self.epoch = next_epoch();
        self.state = ConnectionState::Closed;
        self.status = Some(STATUS_DISCONNECTED.to_string());
        info!("connection closed");
    }

    /// Applies one event. Returns the payload of an inbound frame so the
    /// caller can classify it.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<String> {
        match event {
            ConnectionEvent::Opened { epoch } if self.is_current(epoch) => {
                self.state = ConnectionState::Open;
                self.cancel_reconnect();
                self.status = None;
                info!(epoch, "connected to assistant backend");
                None
            }
            ConnectionEvent::Frame { epoch, text } if self.is_current(epoch) => Some(text),
            ConnectionEvent::Closed { epoch, reason } if self.is_current(epoch) => {
                self.connection_lost(STATUS_LOST, reason.unwrap_or_default());
                None
            }
            ConnectionEvent::Failed { epoch, error } if self.is_current(epoch) => {
                self.connection_lost(STATUS_ERROR, error);
                None
            }
            ConnectionEvent::ReconnectDue { epoch }
                if self.is_current(epoch)
                    && self.state == ConnectionState::Reconnecting
                    && self.reconnect_timer.is_some() =>
            {
                self.reconnect_timer = None;
                self.connect();
                None
            }
            other => {
                debug!(?other, "ignoring event from a replaced connection");
                None
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.state != ConnectionState::Closed
    }

    fn connection_lost(&mut self, status: &str, detail: String) {
        warn!(epoch = self.epoch, %detail, "assistant connection dropped");
        self.transport = None;
        self.state = ConnectionState::Reconnecting;
        self.status = Some(status.to_string());
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            return;
        }
        let events = self.events.clone();
        let delay = self.reconnect_delay;
        let epoch = self.epoch;
        debug!(?delay, epoch, "scheduling reconnect");
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent::ReconnectDue { epoch });
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

impl<C: Connector> FrameSink for ConnectionManager<C> {
    fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    fn send(&mut self, payload: String) -> Result<(), ClientError> {
        if self.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        transport
            .outbound
            .send(payload)
            .map_err(|_| ClientError::Transport("connection writer has stopped".to_string()))
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.cancel_reconnect();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(3);

    fn manager() -> (
        ConnectionManager<FakeConnector>,
        FakeConnector,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), "ws://localhost:8000/ws", DELAY, tx);
        (manager, connector, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_clears_status() {
        let (mut manager, connector, _rx) = manager();
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.status(), Some(STATUS_CONNECTING));

        let epoch = manager.epoch();
        manager.handle_event(ConnectionEvent::Opened { epoch });
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.status(), None);
        assert_eq!(connector.attempts(), vec![epoch]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_closes_schedule_one_reconnect() {
        let (mut manager, connector, mut rx) = manager();
        manager.connect();
        let first = manager.epoch();
        manager.handle_event(ConnectionEvent::Opened { epoch: first });

        for _ in 0..3 {
            manager.handle_event(ConnectionEvent::Closed { epoch: first, reason: None });
            assert!(manager.is_reconnect_pending());
        }
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.status(), Some(STATUS_LOST));

        let started = Instant::now();
        let event = rx.recv().await.unwrap();
        assert_eq!(event, ConnectionEvent::ReconnectDue { epoch: first });
        assert!(started.elapsed() >= DELAY);

        manager.handle_event(event);
        assert_eq!(connector.attempts(), vec![first, manager.epoch()]);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.is_reconnect_pending());

        // Only one timer was ever started.
        let extra = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_retry_after_each_delay() {
        let (mut manager, connector, mut rx) = manager();
        manager.connect();

        for _ in 0..3 {
            manager.handle_event(ConnectionEvent::Failed {
                epoch: manager.epoch(),
                error: "refused".to_string(),
            });
            assert_eq!(manager.status(), Some(STATUS_ERROR));

            let started = Instant::now();
            let event = rx.recv().await.unwrap();
            assert!(started.elapsed() >= DELAY);
            manager.handle_event(event);
        }
        assert_eq!(connector.attempts().len(), 4);
        assert_eq!(connector.attempts().last(), Some(&manager.epoch()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_from_replaced_attempt_are_ignored() {
        let (mut manager, _connector, mut rx) = manager();
        manager.connect();
        let old = manager.epoch();
        manager.handle_event(ConnectionEvent::Failed { epoch: old, error: "x".to_string() });
        let due = rx.recv().await.unwrap();
        manager.handle_event(due);
        let current = manager.epoch();
        assert_ne!(old, current);

        let frame = ConnectionEvent::Frame { epoch: old, text: "late".to_string() };
        assert_eq!(manager.handle_event(frame), None);
        manager.handle_event(ConnectionEvent::Opened { epoch: old });
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.handle_event(ConnectionEvent::Opened { epoch: current });
        let frame = ConnectionEvent::Frame { epoch: current, text: "hello".to_string() };
        assert_eq!(manager.handle_event(frame), Some("hello".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (mut manager, connector, mut rx) = manager();
        manager.connect();
        let epoch = manager.epoch();
        manager.handle_event(ConnectionEvent::Closed { epoch, reason: None });
        assert!(manager.is_reconnect_pending());

        manager.close();
        assert!(!manager.is_reconnect_pending());
        assert_eq!(manager.state(), ConnectionState::Closed);

        let fired = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(fired.is_err());

        // A stray timer event after close does nothing.
        manager.handle_event(ConnectionEvent::ReconnectDue { epoch });
        assert_eq!(connector.attempts(), vec![epoch]);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_timer_from_before_close_does_not_cut_new_delay_short() {
        let (mut manager, connector, mut rx) = manager();
        manager.connect();
        manager.handle_event(ConnectionEvent::Failed { epoch: manager.epoch(), error: "x".to_string() });
        // The first timer fires, but its event is still queued when the user
        // closes and reconnects.
        let stale = rx.recv().await.unwrap();

        manager.close();
        manager.connect();
        manager.handle_event(ConnectionEvent::Failed { epoch: manager.epoch(), error: "y".to_string() });
        assert!(manager.is_reconnect_pending());
        let attempts = connector.attempts().len();

        manager.handle_event(stale);
        assert_eq!(connector.attempts().len(), attempts);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert!(manager.is_reconnect_pending());

        let started = Instant::now();
        let due = rx.recv().await.unwrap();
        assert!(started.elapsed() >= DELAY);
        manager.handle_event(due);
        assert_eq!(connector.attempts().len(), attempts + 1);
        assert!(!manager.is_reconnect_pending());

        let extra = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_manager_ignores_events_queued_for_previous_one() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = FakeConnector::default();
        let mut first = ConnectionManager::new(connector.clone(), "ws://localhost:8000/ws", DELAY, tx.clone());
        first.connect();
        let old = first.epoch();
        first.close();
        drop(first);

        let mut second = ConnectionManager::new(connector.clone(), "ws://localhost:8000/ws", DELAY, tx);
        second.connect();
        assert_ne!(second.epoch(), old);

        second.handle_event(ConnectionEvent::Opened { epoch: old });
        assert_eq!(second.state(), ConnectionState::Connecting);
        let frame = ConnectionEvent::Frame { epoch: old, text: "previous user".to_string() };
        assert_eq!(second.handle_event(frame), None);
        second.handle_event(ConnectionEvent::Failed { epoch: old, error: "x".to_string() });
        assert!(!second.is_reconnect_pending());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_open() {
        let (mut manager, connector, _rx) = manager();
        assert!(matches!(manager.send("hi".to_string()), Err(ClientError::NotConnected)));

        manager.connect();
        assert!(matches!(manager.send("hi".to_string()), Err(ClientError::NotConnected)));

        manager.handle_event(ConnectionEvent::Opened { epoch: manager.epoch() });
        manager.send("hi".to_string()).unwrap();
        assert_eq!(connector.drain_sent(), vec!["hi".to_string()]);
    }

    #[test]
    fn test_endpoint_for_user() {
        assert_eq!(
            endpoint_for_user("ws://localhost:8000/ws", "42").unwrap(),
            "ws://localhost:8000/ws?user_id=42"
        );
        assert!(endpoint_for_user("not a url", "42").is_err());
    }
}
