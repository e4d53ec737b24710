//! WebSocket lifecycle management (§4.E): reconnect/backoff ticking,
//! desynchronization detection, and the JSON message codec. This is the
//! only component in the crate that touches the network; it never mutates
//! [`crate::client::ClientState`] directly — it decodes frames into
//! [`ServerMessage`]s and hands them to its owner over a channel, keeping
//! the transport actor separate from the document actor it feeds.
use crate::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

/// A closes-within-window counter reaching this many failures is treated as
/// terminal (§4.E, §7.2).
const DESYNC_FAILURE_THRESHOLD: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Events the connection manager emits to its owner: lifecycle transitions
/// plus every decoded server message (§6 "editor contract produced").
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Disconnected,
    Desynchronized,
    Error(String),
    Message(ServerMessage),
}

/// Owns the socket and the two reconnect timers. Constructed via [`spawn`],
/// which returns a handle to abort it and a channel of [`ConnectionEvent`]s.
pub struct ConnectionManager {
    uri: Url,
    reconnect_interval: Duration,
    state: ConnectionState,
    recent_failures: u8,
    desynchronized: bool,
    outgoing_rx: UnboundedReceiver<ClientMessage>,
    events_tx: UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Spawns the connection manager as its own task. `outgoing_rx` is fed
    /// by [`crate::client::ClientState`]'s `outgoing` sender; the returned
    /// receiver carries every lifecycle and server event back to the
    /// owner's event loop.
    pub fn spawn(
        uri: Url,
        reconnect_interval_ms: u64,
        outgoing_rx: UnboundedReceiver<ClientMessage>,
    ) -> (JoinHandle<()>, UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = Self {
            uri,
            reconnect_interval: Duration::from_millis(reconnect_interval_ms),
            state: ConnectionState::Idle,
            recent_failures: 0,
            desynchronized: false,
            outgoing_rx,
            events_tx,
        };
        let handle = tokio::spawn(manager.run());
        (handle, events_rx)
    }

    async fn run(mut self) {
        let mut connect_ticker = interval(self.reconnect_interval);
        let mut reset_ticker = interval(self.reconnect_interval * 15);
        let mut socket: Option<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        > = None;

        loop {
            if self.desynchronized {
                // Terminal: stop reconnecting, keep draining outgoing so
                // senders don't block on a full channel, but do nothing
                // with it.
                while self.outgoing_rx.recv().await.is_some() {}
                return;
            }

            tokio::select! {
                _ = connect_ticker.tick() => {
                    if let Some(stream) = self.try_connect().await {
                        socket = Some(stream);
                    }
                }
                _ = reset_ticker.tick() => {
                    self.recent_failures = 0;
                }
                outgoing = self.outgoing_rx.recv() => {
                    match (outgoing, &mut socket) {
                        (Some(msg), Some(ws)) => {
                            if !self.send(ws, msg).await {
                                socket = None;
                            }
                        }
                        (Some(_), None) => debug!("dropping outgoing message, socket not open"),
                        (None, _) => return,
                    }
                }
                incoming = next_frame(&mut socket) => {
                    match incoming {
                        Some(Ok(frame)) => {
                            if self.handle_frame(frame) {
                                socket = None;
                            }
                        }
                        Some(Err(err)) => {
                            self.handle_close(&err.to_string());
                            socket = None;
                        }
                        None => {}
                    }
                }
            }
        }
    }

    async fn try_connect(
        &mut self,
    ) -> Option<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            return None;
        }
        self.state = ConnectionState::Connecting;
        match tokio_tungstenite::connect_async(self.uri.as_str()).await {
            Ok((stream, _response)) => {
                info!(uri = %self.uri, "connection opened");
                self.state = ConnectionState::Open;
                let _ = self.events_tx.send(ConnectionEvent::Opened);
                Some(stream)
            }
            Err(err) => {
                warn!(%err, "connection attempt failed");
                self.register_failure(&err.to_string());
                None
            }
        }
    }

    /// Returns whether the send succeeded; the caller drops the socket on
    /// `false` so the next reconnect tick dials a fresh one.
    async fn send(
        &self,
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        message: ClientMessage,
    ) -> bool {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "failed to encode outgoing message");
                return true;
            }
        };
        match socket.send(WsMessage::Text(text)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "failed to send message");
                false
            }
        }
    }

    /// Returns whether the caller should drop the socket (a close frame or
    /// anything else signaling the peer is gone).
    fn handle_frame(&mut self, frame: WsMessage) -> bool {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                self.handle_close("peer closed the connection");
                return true;
            }
            _ => return false,
        };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(message) => {
                let _ = self.events_tx.send(ConnectionEvent::Message(message));
            }
            Err(err) => {
                warn!(%err, frame = %text, "malformed frame, ignoring");
            }
        }
        false
    }

    fn handle_close(&mut self, reason: &str) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closed;
            let _ = self.events_tx.send(ConnectionEvent::Disconnected);
        }
        self.register_failure(reason);
    }

    fn register_failure(&mut self, reason: &str) {
        self.state = ConnectionState::Closed;
        self.recent_failures += 1;
        let _ = self.events_tx.send(ConnectionEvent::Error(reason.to_string()));
        if self.recent_failures >= DESYNC_FAILURE_THRESHOLD {
            self.desynchronized = true;
            let _ = self.events_tx.send(ConnectionEvent::Desynchronized);
        }
    }
}

async fn next_frame(
    socket: &mut Option<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
) -> Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

/// The `beforeunload` equivalent for a headless host (§4.E, §7.5): whether
/// quitting now would lose unsynchronized local work.
pub fn shutdown_guard(has_unacked_work: bool) -> bool {
    has_unacked_work
}
