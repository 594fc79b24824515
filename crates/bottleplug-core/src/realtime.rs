//! Realtime notifications over a WebSocket.
//!
//! Reconnection is driven by `ReconnectMachine`, an explicit state machine
//! with a bounded retry counter:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     ^             |
//!                     |        (closed/failed)
//!                     |             v
//!                     +------ BackingOff{attempt, delay} --(bound hit)--> GaveUp
//! ```
//!
//! A successful connection resets the counter. `NotificationSocket` runs
//! the machine on a tokio task and forwards incoming notifications.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::Notification;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(3);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Bound on the WebSocket handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the notification channel
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff { attempt: u32, delay: Duration },
    /// Retry budget exhausted; terminal until `reset`
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): base doubled per attempt, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begin a connection attempt. No-op once the machine has given up.
    pub fn begin_connect(&mut self) -> ConnectionState {
        if self.state != ConnectionState::GaveUp {
            self.state = ConnectionState::Connecting;
        }
        self.state
    }

    pub fn on_connected(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Connected;
        self.state
    }

    /// The connection closed or could not be opened
    pub fn on_disconnected(&mut self) -> ConnectionState {
        if self.state == ConnectionState::GaveUp {
            return self.state;
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::GaveUp;
        } else {
            self.attempts += 1;
            self.state = ConnectionState::BackingOff {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            };
        }
        self.state
    }

    /// Deliberate close; no reconnect follows
    pub fn stop(&mut self) -> ConnectionState {
        self.state = ConnectionState::Disconnected;
        self.state
    }

    /// Clear the counter and leave `GaveUp`
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.state = ConnectionState::Disconnected;
    }
}

/// Messages delivered to subscribers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Notification(Notification),
    NotificationUpdate(Notification),
}

/// Parse one text frame; unknown message types yield `None`
pub fn parse_frame(text: &str) -> Option<RealtimeEvent> {
    match serde_json::from_str::<RealtimeEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "Ignoring unrecognized socket message");
            None
        }
    }
}

/// Socket URL with the bearer token as a query parameter
pub fn socket_url(base: &str, token: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(base)
        .map_err(|e| ApiError::Configuration(format!("Invalid socket URL '{}': {}", base, e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

enum ReadEnd {
    Closed,
    ReceiverGone,
}

/// Handle to a running notification socket. Dropping it closes the socket.
pub struct NotificationSocket {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationSocket {
    /// Connect to `url` using the client's current bearer token and keep
    /// reconnecting per `policy`. Returns the handle and the event stream.
    pub fn spawn(
        url: impl Into<String>,
        api: ApiClient,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let url = url.into();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let handle = tokio::spawn(run(url, api, policy, state_tx, event_tx, shutdown_rx));

        (
            Self {
                shutdown_tx,
                state_rx,
                handle: Some(handle),
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub async fn shutdown(mut self) {
        self.shutdown_tx.send(true).ok();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Notification socket task failed");
            }
        }
    }
}

impl Drop for NotificationSocket {
    fn drop(&mut self) {
        self.shutdown_tx.send(true).ok();
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a shutdown request
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn run(
    url: String,
    api: ApiClient,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut machine = ReconnectMachine::new(policy);

    loop {
        state_tx.send_replace(machine.begin_connect());

        let connected = tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => break,
            result = connect(&url, &api) => result,
        };

        match connected {
            Ok(mut stream) => {
                state_tx.send_replace(machine.on_connected());
                info!(url = %url, "Notification socket connected");

                let end = tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => None,
                    end = read_frames(&mut stream, &event_tx) => Some(end),
                };
                match end {
                    Some(ReadEnd::Closed) => info!("Notification socket disconnected"),
                    Some(ReadEnd::ReceiverGone) | None => {
                        debug!("Closing notification socket");
                        stream.send(WsMessage::Close(None)).await.ok();
                        break;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Notification socket connection failed"),
        }

        let state = machine.on_disconnected();
        state_tx.send_replace(state);
        match state {
            ConnectionState::BackingOff { attempt, delay } => {
                info!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting notification socket"
                );
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    _ = time::sleep(delay) => {}
                }
            }
            _ => {
                warn!("Maximum reconnection attempts reached, giving up");
                return;
            }
        }
    }

    state_tx.send_replace(machine.stop());
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(url: &str, api: &ApiClient) -> Result<WsStream, ApiError> {
    let token = api.bearer_token().await?;
    let url = socket_url(url, &token)?;
    let (stream, _response) = time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| ApiError::Timeout)?
        .map_err(|e| ApiError::Configuration(format!("WebSocket handshake failed: {}", e)))?;
    Ok(stream)
}

async fn read_frames(stream: &mut WsStream, event_tx: &mpsc::Sender<RealtimeEvent>) -> ReadEnd {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Some(event) = parse_frame(text.as_str()) {
                    if event_tx.send(event).await.is_err() {
                        return ReadEnd::ReceiverGone;
                    }
                }
            }
            Ok(WsMessage::Close(frame)) => {
                debug!(close_frame = ?frame, "Server closed notification socket");
                return ReadEnd::Closed;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_)) => {
                // pings are answered by tungstenite
            }
            Err(e) => {
                warn!(error = %e, "Notification socket error");
                return ReadEnd::Closed;
            }
        }
    }
    ReadEnd::Closed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_delays_double_up_to_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24, 30, 30]);
        assert_eq!(policy.delay_for(500), RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_gives_up_after_bound() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            assert_eq!(machine.begin_connect(), ConnectionState::Connecting);
            assert!(matches!(
                machine.on_disconnected(),
                ConnectionState::BackingOff { attempt: a, .. } if a == attempt
            ));
        }
        machine.begin_connect();
        assert_eq!(machine.on_disconnected(), ConnectionState::GaveUp);
        // Terminal
        assert_eq!(machine.begin_connect(), ConnectionState::GaveUp);
        assert_eq!(machine.on_disconnected(), ConnectionState::GaveUp);

        machine.reset();
        assert_eq!(machine.begin_connect(), ConnectionState::Connecting);
    }

    #[test]
    fn test_counter_resets_on_connect() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
        machine.begin_connect();
        machine.on_disconnected();
        machine.begin_connect();
        machine.on_disconnected();
        assert_eq!(machine.attempts(), 2);

        machine.begin_connect();
        assert_eq!(machine.on_connected(), ConnectionState::Connected);
        assert_eq!(machine.attempts(), 0);
        assert_eq!(
            machine.on_disconnected(),
            ConnectionState::BackingOff {
                attempt: 1,
                delay: RECONNECT_BASE_DELAY
            }
        );
    }

    #[test]
    fn test_parse_frame() {
        let event = parse_frame(
            r#"{"type": "notification", "data": {"id": 9, "title": "Paid", "message": "Order 12 paid"}}"#,
        )
        .unwrap();
        assert!(matches!(event, RealtimeEvent::Notification(n) if n.title == "Paid"));

        assert!(matches!(
            parse_frame(r#"{"type": "notification_update", "data": {"id": 9, "is_read": true}}"#),
            Some(RealtimeEvent::NotificationUpdate(n)) if n.is_read
        ));
        assert_eq!(parse_frame(r#"{"type": "typing", "data": {}}"#), None);
        assert_eq!(parse_frame("not json"), None);
    }

    #[test]
    fn test_socket_url_encodes_token() {
        let url = socket_url("ws://localhost:8000/ws/notifications/", "a b+c").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/notifications/?token=a+b%2Bc"
        );
        assert!(socket_url("not a url", "t").is_err());
    }

    mod live {
        use super::*;
        use std::sync::Arc;

        use tokio::net::TcpListener;

        use crate::auth::session::ACCESS_TOKEN_KEY;
        use crate::auth::SessionManager;
        use crate::config::ClientConfig;
        use crate::storage::{KeyValueStore, MemoryStore};

        fn client() -> ApiClient {
            let store = Arc::new(MemoryStore::new());
            store.set(ACCESS_TOKEN_KEY, "tok").unwrap();
            ApiClient::new(
                ClientConfig::new("http://127.0.0.1:9/api/v1"),
                SessionManager::new(store),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_forwards_notifications() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                ws.send(WsMessage::text(
                    r#"{"type": "notification", "data": {"id": 1, "title": "Shipped", "message": "On its way"}}"#,
                ))
                .await
                .unwrap();
                // Hold the connection open until the client goes away
                while ws.next().await.is_some() {}
            });

            let (socket, mut events) = NotificationSocket::spawn(
                format!("ws://{}/ws/notifications/", addr),
                client(),
                fast_policy(1),
            );
            let event = time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, RealtimeEvent::Notification(n) if n.title == "Shipped"));
            assert_eq!(socket.state(), ConnectionState::Connected);

            socket.shutdown().await;
        }

        #[tokio::test]
        async fn test_gives_up_when_unreachable() {
            // Bind then drop to get a port with nothing listening
            let addr = TcpListener::bind("127.0.0.1:0")
                .await
                .unwrap()
                .local_addr()
                .unwrap();

            let (socket, _events) = NotificationSocket::spawn(
                format!("ws://{}/ws/notifications/", addr),
                client(),
                fast_policy(2),
            );
            let mut states = socket.subscribe();
            let gave_up = time::timeout(
                Duration::from_secs(5),
                states.wait_for(|s| *s == ConnectionState::GaveUp),
            )
            .await
            .is_ok_and(|r| r.is_ok());
            assert!(gave_up);

            socket.shutdown().await;
        }
    }
}
