//! Connection manager for the inference service socket.
//!
//! The socket is pumped by a single spawned task. Everything it observes is
//! reported back as a [`TaggedEvent`] on one channel, so the dispatch loop is
//! the only place session state changes.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::ClientError;
use crate::logic::telemetry::{TelemetryPacket, TelemetryRun, now_ms};
use crate::session::{ConnectionState, StreamingSession};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Message(String),
    Closed { reason: String },
    Errored { reason: String },
}

/// An event stamped with the generation of the socket that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ConnectionEvent,
}

/// Outbound half of the transport as seen by the frame controller.
pub trait FrameLink {
    fn send_text(&mut self, text: String) -> Result<(), ClientError>;
}

struct LiveSocket {
    outbound: flume::Sender<Message>,
    task: JoinHandle<()>,
    /// Set once the pump reports `Opened`.
    opened: bool,
}

pub struct ConnectionManager {
    endpoint: Url,
    outbound_capacity: usize,
    generation: u64,
    socket: Option<LiveSocket>,
    /// Pump of a closed socket that is still sending its close frame.
    closing: Option<JoinHandle<()>>,
    events_tx: flume::Sender<TaggedEvent>,
    events_rx: flume::Receiver<TaggedEvent>,
}

impl ConnectionManager {
    pub fn new(endpoint: Url, outbound_capacity: usize) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            endpoint,
            outbound_capacity: outbound_capacity.max(1),
            generation: 0,
            socket: None,
            closing: None,
            events_tx,
            events_rx,
        }
    }

    /// Receiver for socket events. All clones share one queue.
    pub fn events(&self) -> flume::Receiver<TaggedEvent> {
        self.events_rx.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Starts connecting in the background. The outcome arrives as an
    /// `Opened` or `Errored` event. A session never holds two sockets, so this
    /// is a no-op while one is live or pending.
    pub fn open(&mut self, session: &mut StreamingSession) {
        if self.socket.is_some() {
            debug!("Session {}: socket already open", session.id);
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let (outbound, outbound_rx) = flume::bounded(self.outbound_capacity);
        let events = self.events_tx.clone();
        let url = self.endpoint.clone();

        info!("Session {}: connecting to {url}", session.id);
        let task = tokio::spawn(pump_socket(url, generation, outbound_rx, events));
        self.socket = Some(LiveSocket {
            outbound,
            task,
            opened: false,
        });
    }

    /// Tears the socket down (if any) and resets the session. Safe to call repeatedly.
    pub fn close(&mut self, session: &mut StreamingSession, telemetry: &TelemetryRun) {
        if let Some(socket) = self.socket.take() {
            if !socket.opened {
                // Still handshaking; nothing to close gracefully.
                socket.task.abort();
            } else if socket.outbound.try_send(Message::Close(None)).is_ok() {
                self.closing = Some(socket.task);
            } else {
                socket.task.abort();
            }
        }
        self.transition(
            session,
            telemetry,
            ConnectionState::Disconnected,
            "closed by client",
        );
        session.status = "Monitoring stopped".to_string();
        session.cascade_reset();
    }

    /// Waits up to `limit` for the pump of the last closed socket to send its
    /// close frame. Returns false if it was still busy.
    pub async fn settle(&mut self, limit: Duration) -> bool {
        let Some(task) = self.closing.take() else {
            return true;
        };
        match tokio::time::timeout(limit, task).await {
            Ok(_) => true,
            Err(_) => {
                debug!("Close handshake still pending after {limit:?}");
                false
            }
        }
    }

    /// Applies a lifecycle event and hands back message payloads for the
    /// demultiplexer. Events from a socket other than the live one are ignored.
    pub fn accept(
        &mut self,
        tagged: TaggedEvent,
        session: &mut StreamingSession,
        telemetry: &TelemetryRun,
    ) -> Option<String> {
        if self.socket.is_none() || tagged.generation != self.generation {
            debug!(
                "Session {}: ignoring event from socket generation {} (live: {})",
                session.id, tagged.generation, self.generation
            );
            return None;
        }

        match tagged.event {
            ConnectionEvent::Opened => {
                if let Some(socket) = self.socket.as_mut() {
                    socket.opened = true;
                }
                self.transition(session, telemetry, ConnectionState::Connected, "opened");
                session.status = "Connected to AI server".to_string();
                None
            }
            ConnectionEvent::Message(text) => Some(text),
            ConnectionEvent::Closed { reason } => {
                self.socket = None;
                self.transition(session, telemetry, ConnectionState::Disconnected, &reason);
                session.status = "Disconnected from AI server".to_string();
                session.cascade_reset();
                None
            }
            ConnectionEvent::Errored { reason } => {
                self.socket = None;
                let was_connected = session.connection() == ConnectionState::Connected;
                self.transition(session, telemetry, ConnectionState::Errored, &reason);
                session.status = if was_connected {
                    "Connection error".to_string()
                } else {
                    "Failed to connect to AI server".to_string()
                };
                session.cascade_reset();
                None
            }
        }
    }

    fn transition(
        &self,
        session: &mut StreamingSession,
        telemetry: &TelemetryRun,
        to: ConnectionState,
        reason: &str,
    ) {
        let from = session.connection();
        if from == to {
            return;
        }
        match to {
            ConnectionState::Errored => error!("Session {}: {from} -> {to} ({reason})", session.id),
            _ => info!("Session {}: {from} -> {to} ({reason})", session.id),
        }
        telemetry.write(&TelemetryPacket::ConnectionTransition {
            session: &session.id,
            from: from.as_str(),
            to: to.as_str(),
            reason,
            ts: now_ms(),
        });
        session.set_connection(to);
    }
}

impl FrameLink for ConnectionManager {
    fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        let Some(socket) = &self.socket else {
            return Err(ClientError::Send("not connected".into()));
        };
        match socket.outbound.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => Err(ClientError::Send("outbound queue full".into())),
            Err(flume::TrySendError::Disconnected(_)) => {
                Err(ClientError::Send("socket closed".into()))
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.task.abort();
        }
    }
}

/// Connects, then shuttles outbound messages to the socket and inbound frames
/// to the event channel until either side ends.
async fn pump_socket(
    url: Url,
    generation: u64,
    outbound: flume::Receiver<Message>,
    events: flume::Sender<TaggedEvent>,
) {
    let emit = |event: ConnectionEvent| {
        // The receiver lives as long as the manager; nothing to do if it is gone.
        let _ = events.send(TaggedEvent { generation, event });
    };

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            let err = ClientError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            };
            emit(ConnectionEvent::Errored {
                reason: err.to_string(),
            });
            return;
        }
    };
    emit(ConnectionEvent::Opened);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            out = outbound.recv_async() => match out {
                Ok(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = sink.send(msg).await {
                        emit(ConnectionEvent::Errored { reason: format!("send failed: {e}") });
                        return;
                    }
                    if closing {
                        debug!("Socket generation {generation}: close sent");
                        return;
                    }
                }
                Err(_) => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(ConnectionEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    emit(ConnectionEvent::Message(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    emit(ConnectionEvent::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Socket generation {generation}: read failed: {e}");
                    emit(ConnectionEvent::Errored { reason: format!("read failed: {e}") });
                    return;
                }
                None => {
                    emit(ConnectionEvent::Closed { reason: "stream ended".to_string() });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refused_endpoint() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Url::parse(&format!("ws://127.0.0.1:{port}/ws/image")).unwrap()
    }

    #[tokio::test]
    async fn failed_connect_reports_errored_state() {
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        session.history.push(120.0, 60.0);
        let mut manager = ConnectionManager::new(refused_endpoint(), 4);
        let events = manager.events();

        manager.open(&mut session);
        assert!(manager.is_open());
        let tagged = tokio::time::timeout(Duration::from_secs(5), events.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(tagged.event, ConnectionEvent::Errored { .. }));

        assert_eq!(manager.accept(tagged, &mut session, &telemetry), None);
        assert_eq!(session.connection(), ConnectionState::Errored);
        assert_eq!(session.status, "Failed to connect to AI server");
        assert!(session.history.is_empty());
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn events_from_other_generations_are_ignored() {
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(refused_endpoint(), 4);

        // Nothing is open yet.
        let stale = TaggedEvent {
            generation: 0,
            event: ConnectionEvent::Message(r#"{"status":"success"}"#.into()),
        };
        assert_eq!(manager.accept(stale, &mut session, &telemetry), None);

        manager.open(&mut session);
        let old = TaggedEvent {
            generation: manager.generation() - 1,
            event: ConnectionEvent::Closed {
                reason: "old socket".into(),
            },
        };
        session.history.push(1.0, 1.0);
        assert_eq!(manager.accept(old, &mut session, &telemetry), None);
        assert_eq!(session.history.len(), 1);
        assert!(manager.is_open());
    }

    #[tokio::test]
    async fn opened_event_connects_and_messages_pass_through() {
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(refused_endpoint(), 4);
        manager.open(&mut session);
        let generation = manager.generation();

        let opened = TaggedEvent {
            generation,
            event: ConnectionEvent::Opened,
        };
        assert_eq!(manager.accept(opened, &mut session, &telemetry), None);
        assert_eq!(session.connection(), ConnectionState::Connected);
        assert_eq!(session.status, "Connected to AI server");

        let message = TaggedEvent {
            generation,
            event: ConnectionEvent::Message("hello".into()),
        };
        assert_eq!(
            manager.accept(message, &mut session, &telemetry),
            Some("hello".to_string())
        );

        let closed = TaggedEvent {
            generation,
            event: ConnectionEvent::Closed {
                reason: "closed by server".into(),
            },
        };
        manager.accept(closed, &mut session, &telemetry);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.status, "Disconnected from AI server");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_sending_requires_a_socket() {
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(refused_endpoint(), 4);

        assert!(matches!(
            manager.send_text("frame".into()),
            Err(ClientError::Send(_))
        ));

        manager.open(&mut session);
        manager.close(&mut session, &telemetry);
        manager.close(&mut session, &telemetry);
        assert!(!manager.is_open());
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert!(manager.send_text("frame".into()).is_err());
    }

    #[tokio::test]
    async fn error_after_open_is_a_connection_error() {
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(refused_endpoint(), 4);
        manager.open(&mut session);
        let generation = manager.generation();
        manager.accept(
            TaggedEvent {
                generation,
                event: ConnectionEvent::Opened,
            },
            &mut session,
            &telemetry,
        );
        session.record_sent(std::time::Instant::now());
        session.history.push(110.0, 55.0);
        session.latest_metric = Some(Default::default());

        let errored = TaggedEvent {
            generation,
            event: ConnectionEvent::Errored {
                reason: "read failed: connection reset".into(),
            },
        };
        assert_eq!(manager.accept(errored, &mut session, &telemetry), None);
        assert_eq!(session.connection(), ConnectionState::Errored);
        assert_eq!(session.status, "Connection error");
        assert_eq!(session.in_flight(), 0);
        assert!(session.history.is_empty());
        assert!(session.latest_metric.is_none());
        assert!(!manager.is_open());
    }

    /// Local WebSocket endpoint. Counts accepted TCP connections and reports
    /// every close frame it receives.
    async fn spawn_server() -> (Url, Arc<AtomicUsize>, flume::Receiver<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (closed_tx, closed_rx) = flume::unbounded();

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let closed = closed_tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Close(_) = msg {
                            let _ = closed.send(());
                        }
                    }
                });
            }
        });

        let url = Url::parse(&format!("ws://{addr}/ws/image")).unwrap();
        (url, accepted, closed_rx)
    }

    async fn next_event(events: &flume::Receiver<TaggedEvent>) -> TaggedEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv_async())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn reopening_before_the_handshake_keeps_one_socket() {
        let (url, accepted, _closed) = spawn_server().await;
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(url, 4);
        let events = manager.events();

        manager.open(&mut session);
        manager.close(&mut session, &telemetry);
        manager.open(&mut session);

        let tagged = next_event(&events).await;
        assert_eq!(tagged.generation, manager.generation());
        assert_eq!(tagged.event, ConnectionEvent::Opened);
        manager.accept(tagged, &mut session, &telemetry);
        assert_eq!(session.connection(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn close_frame_reaches_the_server_before_settle_returns() {
        let (url, accepted, closed) = spawn_server().await;
        let telemetry = TelemetryRun::disabled();
        let mut session = StreamingSession::new();
        let mut manager = ConnectionManager::new(url, 4);
        let events = manager.events();

        manager.open(&mut session);
        let tagged = next_event(&events).await;
        manager.accept(tagged, &mut session, &telemetry);
        assert_eq!(session.connection(), ConnectionState::Connected);

        manager.close(&mut session, &telemetry);
        assert!(manager.settle(Duration::from_secs(2)).await);
        tokio::time::timeout(Duration::from_secs(2), closed.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        // Nothing left to wait for.
        assert!(manager.settle(Duration::from_millis(1)).await);
    }
}
