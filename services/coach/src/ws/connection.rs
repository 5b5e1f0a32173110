//! Connection lifecycle management.
//!
//! `ConnectionManager` owns the one live connection of a session. Each open
//! fetches a fresh signed URL, connects, and transmits the initiation envelope
//! before anything else. The socket itself lives in a spawned I/O task; the
//! manager talks to it through an outbound channel and learns about it
//! through [`ConnectionEvent`]s tagged with a generation number, so events
//! from a replaced connection are recognised and dropped.

use super::transport::{Connector, encode};
use crate::signed_url::SignedUrlIssuer;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use repcoach_core::dispatch::Inbound;
use repcoach_core::protocol::{ClientEnvelope, OutgoingFrame};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Intentional,
    Lost,
}

/// Notifications from the connection I/O task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The initiation envelope has been written; the connection is usable.
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<Message>,
        connected_at: DateTime<Utc>,
    },
    Frame {
        generation: u64,
        inbound: Inbound,
    },
    Closed {
        generation: u64,
        reason: CloseReason,
        detail: String,
    },
}

/// Delay before each reconnect attempt.
///
/// The default is a fixed 2 s delay with no cap on attempts. A multiplier
/// above 1.0 turns it into capped exponential backoff, and `jitter` adds a
/// uniform random extra delay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            multiplier: 1.0,
            max_delay: Duration::from_secs(2),
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.delay);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.delay.as_secs_f64() * self.multiplier.powi(exponent);
        let base = Duration::try_from_secs_f64(secs).unwrap_or(cap).min(cap);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Static inputs of every connection attempt.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub agent_id: String,
    pub initiation: ClientEnvelope,
    pub reconnect: ReconnectPolicy,
}

enum Link {
    Closed,
    Connecting {
        task: JoinHandle<()>,
    },
    Open {
        outbound: mpsc::UnboundedSender<Message>,
        connected_at: DateTime<Utc>,
    },
}

pub struct ConnectionManager {
    issuer: Arc<dyn SignedUrlIssuer>,
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    link: Link,
    generation: u64,
    close_reason: Option<CloseReason>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    reconnect_attempt: u32,
    opened_count: u32,
}

impl ConnectionManager {
    pub fn new(
        issuer: Arc<dyn SignedUrlIssuer>,
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
        events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            issuer,
            connector,
            settings,
            events_tx,
            link: Link::Closed,
            generation: 0,
            close_reason: None,
            reconnect_timer: None,
            reconnect_attempt: 0,
            opened_count: 0,
        }
    }

    /// Starts connecting unless a connection is already open or underway.
    pub fn open(&mut self) {
        if !matches!(self.link, Link::Closed) {
            debug!(generation = self.generation, "Open requested while already connected");
            return;
        }
        self.reconnect_timer = None;
        self.generation += 1;
        let generation = self.generation;
        info!(generation, attempt = self.reconnect_attempt, "Opening connection");

        let task = tokio::spawn(run_connection(
            generation,
            Arc::clone(&self.issuer),
            Arc::clone(&self.connector),
            self.settings.agent_id.clone(),
            self.settings.initiation.clone(),
            self.events_tx.clone(),
        ));
        self.link = Link::Connecting { task };
    }

    /// True when `generation` belongs to the current connection.
    pub fn accepts(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Adopts a freshly opened connection. Returns `false` for a stale one,
    /// which is dropped and thereby closed.
    pub fn on_opened(
        &mut self,
        generation: u64,
        outbound: mpsc::UnboundedSender<Message>,
        connected_at: DateTime<Utc>,
    ) -> bool {
        if !self.accepts(generation) || !matches!(self.link, Link::Connecting { .. }) {
            debug!(generation, current = self.generation, "Dropping stale connection");
            return false;
        }
        info!(generation, "Connection open");
        self.link = Link::Open {
            outbound,
            connected_at,
        };
        self.close_reason = None;
        self.reconnect_attempt = 0;
        self.opened_count += 1;
        true
    }

    /// Records the end of the current connection. When the loss was not
    /// intentional and `may_reconnect` holds, schedules exactly one reconnect
    /// and returns its attempt number and delay.
    pub fn on_closed(
        &mut self,
        generation: u64,
        reason: CloseReason,
        detail: &str,
        may_reconnect: bool,
    ) -> Option<(u32, Duration)> {
        if !self.accepts(generation) {
            debug!(generation, "Ignoring close of a replaced connection");
            return None;
        }
        match reason {
            CloseReason::Intentional => info!(generation, detail, "Connection closed by peer"),
            CloseReason::Lost => warn!(generation, detail, "Connection lost"),
        }
        self.link = Link::Closed;
        self.close_reason = Some(reason);

        if reason == CloseReason::Lost && may_reconnect {
            Some(self.schedule_reconnect())
        } else {
            None
        }
    }

    fn schedule_reconnect(&mut self) -> (u32, Duration) {
        if let Some(timer) = &self.reconnect_timer {
            let remaining = timer
                .deadline()
                .saturating_duration_since(tokio::time::Instant::now());
            return (self.reconnect_attempt, remaining);
        }
        self.reconnect_attempt += 1;
        let delay = self.settings.reconnect.delay_for(self.reconnect_attempt);
        info!(
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        (self.reconnect_attempt, delay)
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Resolves when the scheduled reconnect is due. Never resolves when none
    /// is scheduled. Cancel-safe: the timer survives if this future is dropped.
    pub async fn reconnect_due(&mut self) {
        match self.reconnect_timer.as_mut() {
            Some(timer) => {
                timer.await;
                self.reconnect_timer = None;
            }
            None => std::future::pending().await,
        }
    }

    /// Transmits a frame. Never blocks; a frame sent while the connection is
    /// not open is logged and dropped.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        let Link::Open { outbound, .. } = &self.link else {
            debug!(kind = frame.kind(), "Connection not open, dropping frame");
            return false;
        };
        let kind = frame.kind();
        let message = match encode(frame) {
            Ok(message) => message,
            Err(e) => {
                error!(kind, error = %format!("{e:#}"), "Failed to encode frame");
                return false;
            }
        };
        if outbound.send(message).is_err() {
            warn!(kind, "Connection task gone, dropping frame");
            return false;
        }
        debug!(kind, "Frame queued");
        true
    }

    /// Closes the connection and cancels any pending reconnect. An
    /// intentional close sends a normal close frame to the peer.
    pub fn close(&mut self, intentional: bool) {
        self.reconnect_timer = None;
        let reason = if intentional {
            CloseReason::Intentional
        } else {
            CloseReason::Lost
        };
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Open { outbound, .. } => {
                if intentional {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Session ended".into(),
                    };
                    // The task writes the close frame, then exits once the
                    // channel is dropped.
                    let _ = outbound.send(Message::Close(Some(frame)));
                }
            }
            Link::Connecting { task } => task.abort(),
            Link::Closed => {}
        }
        // Anything the old task still reports is now stale.
        self.generation += 1;
        self.close_reason = Some(reason);
        if intentional {
            self.reconnect_attempt = 0;
        }
        info!(intentional, "Connection closed");
    }

    pub fn is_open(&self) -> bool {
        matches!(self.link, Link::Open { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.link, Link::Connecting { .. })
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        match &self.link {
            Link::Open { connected_at, .. } => Some(*connected_at),
            _ => None,
        }
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Successful opens after the first one.
    pub fn reconnects(&self) -> u32 {
        self.opened_count.saturating_sub(1)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Link::Connecting { task } = &self.link {
            task.abort();
        }
    }
}

/// The I/O task of one connection.
async fn run_connection(
    generation: u64,
    issuer: Arc<dyn SignedUrlIssuer>,
    connector: Arc<dyn Connector>,
    agent_id: String,
    initiation: ClientEnvelope,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let lost = |detail: String| ConnectionEvent::Closed {
        generation,
        reason: CloseReason::Lost,
        detail,
    };

    let url = match issuer.signed_url(&agent_id).await {
        Ok(url) => url,
        Err(e) => {
            let _ = events_tx.send(lost(format!("{e:#}")));
            return;
        }
    };

    let (mut sink, mut stream) = match connector.connect(&url).await {
        Ok(halves) => halves,
        Err(e) => {
            let _ = events_tx.send(lost(format!("{e:#}")));
            return;
        }
    };

    let init = match encode(initiation.into()) {
        Ok(message) => message,
        Err(e) => {
            let _ = events_tx.send(lost(format!("{e:#}")));
            return;
        }
    };
    if let Err(e) = sink.send(init).await {
        let _ = events_tx.send(lost(format!("failed to send initiation envelope: {e}")));
        return;
    }

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let opened = ConnectionEvent::Opened {
        generation,
        outbound,
        connected_at: Utc::now(),
    };
    if events_tx.send(opened).is_err() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            message = outbound_rx.recv() => match message {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        let _ = events_tx.send(lost(format!("send failed: {e}")));
                        return;
                    }
                    if closing {
                        let _ = sink.close().await;
                        return;
                    }
                }
                // The manager dropped this connection.
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let inbound = Inbound::Text(text.as_str().to_owned());
                    if events_tx.send(ConnectionEvent::Frame { generation, inbound }).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let inbound = Inbound::Binary(data);
                    if events_tx.send(ConnectionEvent::Frame { generation, inbound }).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (reason, detail) = match frame {
                        Some(f) if f.code == CloseCode::Normal => {
                            (CloseReason::Intentional, f.reason.as_str().to_owned())
                        }
                        Some(f) => (CloseReason::Lost, format!("closed with {}: {}", f.code, f.reason)),
                        None => (CloseReason::Lost, "closed without status".to_string()),
                    };
                    let _ = events_tx.send(ConnectionEvent::Closed { generation, reason, detail });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events_tx.send(lost(e.to_string()));
                    return;
                }
                None => {
                    let _ = events_tx.send(lost("stream ended".to_string()));
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signed_url::MockSignedUrlIssuer;
    use crate::ws::transport::{FrameSink, FrameStream, WsError};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use repcoach_core::protocol::ConversationConfig;
    use std::sync::Mutex;

    struct Server {
        received: fmpsc::UnboundedReceiver<Message>,
        inject: fmpsc::UnboundedSender<Result<Message, WsError>>,
    }

    struct ChannelConnector {
        urls: Mutex<Vec<String>>,
        servers: mpsc::UnboundedSender<Server>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self, url: &str) -> anyhow::Result<(FrameSink, FrameStream)> {
            self.urls.lock().unwrap().push(url.to_string());
            let (client_tx, received) = fmpsc::unbounded::<Message>();
            let (inject, client_rx) = fmpsc::unbounded::<Result<Message, WsError>>();
            self.servers
                .send(Server { received, inject })
                .map_err(|_| anyhow!("test dropped the server side"))?;
            let sink = client_tx.sink_map_err(|_| WsError::ConnectionClosed);
            Ok((Box::pin(sink), Box::pin(client_rx)))
        }
    }

    fn issuer_returning(urls: &'static [&'static str]) -> MockSignedUrlIssuer {
        let mut issuer = MockSignedUrlIssuer::new();
        let mut seq = mockall::Sequence::new();
        for url in urls {
            issuer
                .expect_signed_url()
                .withf(|agent| agent.to_string() == "agent_123")
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(url.to_string()));
        }
        issuer
    }

    fn manager(
        issuer: MockSignedUrlIssuer,
    ) -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        mpsc::UnboundedReceiver<Server>,
        Arc<ChannelConnector>,
    ) {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ChannelConnector {
            urls: Mutex::new(Vec::new()),
            servers: servers_tx,
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let settings = ConnectionSettings {
            agent_id: "agent_123".into(),
            initiation: ConversationConfig::default().initiation_envelope(),
            reconnect: ReconnectPolicy::default(),
        };
        let manager = ConnectionManager::new(
            Arc::new(issuer),
            connector.clone(),
            settings,
            events_tx,
        );
        (manager, events_rx, servers_rx, connector)
    }

    async fn expect_opened(
        manager: &mut ConnectionManager,
        events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        match events.recv().await.unwrap() {
            ConnectionEvent::Opened {
                generation,
                outbound,
                connected_at,
            } => assert!(manager.on_opened(generation, outbound, connected_at)),
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    fn text(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_sends_initiation_first() {
        let (mut manager, mut events, mut servers, connector) =
            manager(issuer_returning(&["wss://agent.test/1"]));

        manager.open();
        assert!(manager.is_connecting());
        let mut server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;
        assert!(manager.is_open());
        assert!(manager.connected_at().is_some());

        let first = text(server.received.next().await.unwrap());
        assert_eq!(first["type"], "conversation_initiation_client_data");

        assert!(manager.send(ClientEnvelope::Pong { event_id: 7 }.into()));
        let second = text(server.received.next().await.unwrap());
        assert_eq!(second, serde_json::json!({"type": "pong", "event_id": 7}));

        assert_eq!(
            connector.urls.lock().unwrap().as_slice(),
            ["wss://agent.test/1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_are_forwarded_in_order() {
        let (mut manager, mut events, mut servers, _connector) =
            manager(issuer_returning(&["wss://agent.test/1"]));
        manager.open();
        let server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;

        server
            .inject
            .unbounded_send(Ok(Message::Text("first".into())))
            .unwrap();
        server
            .inject
            .unbounded_send(Ok(Message::Binary(bytes::Bytes::from_static(b"pcm"))))
            .unwrap();

        match events.recv().await.unwrap() {
            ConnectionEvent::Frame { inbound, .. } => {
                assert_eq!(inbound, Inbound::Text("first".into()))
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events.recv().await.unwrap() {
            ConnectionEvent::Frame { inbound, .. } => {
                assert_eq!(inbound, Inbound::Binary(bytes::Bytes::from_static(b"pcm")))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_while_closed_is_dropped() {
        let (manager, _events, _servers, _connector) = manager(MockSignedUrlIssuer::new());
        assert!(!manager.is_open());
        assert!(!manager.send(ClientEnvelope::Pong { event_id: 1 }.into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_schedules_one_reconnect_with_fresh_url() {
        let (mut manager, mut events, mut servers, connector) =
            manager(issuer_returning(&["wss://agent.test/1", "wss://agent.test/2"]));
        manager.open();
        let server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;

        // Server goes away.
        drop(server);
        let (generation, reason, detail) = match events.recv().await.unwrap() {
            ConnectionEvent::Closed {
                generation,
                reason,
                detail,
            } => (generation, reason, detail),
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(reason, CloseReason::Lost);

        let scheduled = manager.on_closed(generation, reason, &detail, true);
        assert_eq!(scheduled, Some((1, Duration::from_secs(2))));
        // A second loss report does not add a second timer.
        assert_eq!(manager.on_closed(generation, reason, &detail, true).map(|s| s.0), Some(1));
        assert_eq!(manager.close_reason(), Some(CloseReason::Lost));

        let before = tokio::time::Instant::now();
        manager.reconnect_due().await;
        assert!(tokio::time::Instant::now() - before >= Duration::from_secs(2));
        assert!(!manager.reconnect_pending());

        manager.open();
        let _server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;
        assert_eq!(manager.reconnect_attempt(), 0);
        assert_eq!(manager.reconnects(), 1);
        assert_eq!(connector.urls.lock().unwrap().len(), 2);
        assert_eq!(connector.urls.lock().unwrap()[1], "wss://agent.test/2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_issuer_failure_is_a_lost_connection() {
        let mut issuer = MockSignedUrlIssuer::new();
        issuer
            .expect_signed_url()
            .returning(|_| Err(anyhow!("issuer unavailable")));
        let (mut manager, mut events, _servers, _connector) = manager(issuer);

        manager.open();
        match events.recv().await.unwrap() {
            ConnectionEvent::Closed {
                generation,
                reason,
                detail,
            } => {
                assert_eq!(reason, CloseReason::Lost);
                assert!(detail.contains("issuer unavailable"));
                assert!(manager.on_closed(generation, reason, &detail, true).is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!manager.is_connecting());
        assert!(manager.reconnect_pending());
    }

    #[tokio::test]
    async fn test_intentional_close_sends_close_frame_and_never_reconnects() {
        let (mut manager, mut events, mut servers, _connector) =
            manager(issuer_returning(&["wss://agent.test/1"]));
        manager.open();
        let mut server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;
        let _init = server.received.next().await.unwrap();

        manager.close(true);
        assert!(!manager.is_open());
        assert!(!manager.reconnect_pending());
        assert_eq!(manager.close_reason(), Some(CloseReason::Intentional));

        match server.received.next().await.unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close frame, got {other:?}"),
        }
        // The I/O task closed its sink.
        assert!(server.received.next().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_normal_close_is_intentional() {
        let (mut manager, mut events, mut servers, _connector) =
            manager(issuer_returning(&["wss://agent.test/1"]));
        manager.open();
        let server = servers.recv().await.unwrap();
        expect_opened(&mut manager, &mut events).await;

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "conversation ended".into(),
        };
        server
            .inject
            .unbounded_send(Ok(Message::Close(Some(frame))))
            .unwrap();
        match events.recv().await.unwrap() {
            ConnectionEvent::Closed {
                generation,
                reason,
                detail,
            } => {
                assert_eq!(reason, CloseReason::Intentional);
                assert_eq!(detail, "conversation ended");
                assert!(manager.on_closed(generation, reason, &detail, true).is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!manager.reconnect_pending());
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let (mut manager, mut events, mut servers, _connector) =
            manager(issuer_returning(&["wss://agent.test/1"]));
        manager.open();
        let _server = servers.recv().await.unwrap();
        let opened = events.recv().await.unwrap();
        // Closed before the open was observed.
        manager.close(false);
        if let ConnectionEvent::Opened {
            generation,
            outbound,
            connected_at,
        } = opened
        {
            assert!(!manager.on_opened(generation, outbound, connected_at));
            assert!(manager.on_closed(generation, CloseReason::Lost, "late", true).is_none());
        } else {
            panic!("expected Opened");
        }
        assert!(!manager.is_open());
    }

    #[test]
    fn test_default_policy_is_fixed_two_seconds() {
        let policy = ReconnectPolicy::default();
        for attempt in [1, 2, 10, 10_000] {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ReconnectPolicy {
            jitter: Duration::from_millis(300),
            ..Default::default()
        };
        for attempt in 1..50 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2300));
        }
    }
}
