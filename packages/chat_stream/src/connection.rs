//! ConnectionManager: one websocket per active chat session.
//!
//! The worker task owns the socket. It connects, sends the handshake, forwards
//! decoded frames to the session client, and on any drop waits a fixed delay
//! and starts over. `stop()` cancels it for good.
//!
//! ```text
//!   disconnected ──open──▶ connecting ──socket open──▶ open ──stop──▶ closing
//!        ▲                      │                        │               │
//!        └──── drop / error ────┴──── drop / error ──────┘◀──────────────┘
//!                 (retry after delay unless stopped)
//! ```
//!
//! Every event is tagged with the manager's [`Generation`] so the receiver can
//! discard anything from a manager it has already replaced.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::{ClientFrame, ServerFrame, decode, encode};
use crate::model::AuthToken;

/// Fixed delay between a drop and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Monotonic activation counter. Bumped on every session switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub token: AuthToken,
    pub session_id: String,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Frame(ServerFrame),
}

/// Events from a manager, tagged with the generation that produced them.
pub type GenerationEvent = (Generation, ConnectionEvent);

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("connection manager stopped")]
    Stopped,
}

/// Handle to a running connection worker.
///
/// Dropping the handle cancels the worker; `stop()` additionally waits for the
/// socket to be closed.
pub struct ConnectionManager {
    generation: Generation,
    session_id: String,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn the worker and start connecting immediately.
    pub fn open(
        config: ConnectionConfig,
        generation: Generation,
        events: mpsc::UnboundedSender<GenerationEvent>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session_id = config.session_id.clone();

        let worker = Worker {
            config,
            generation,
            events,
            state: state_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            generation,
            session_id,
            state: state_rx,
            outbound: outbound_tx,
            cancel,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue a `userMessage` frame. Rejected unless the socket is open.
    pub fn send_user_message(&self, text: &str) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Stopped);
        }
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.outbound
            .send(ClientFrame::UserMessage {
                user_message: text.to_string(),
            })
            .map_err(|_| ConnectionError::Stopped)
    }

    /// Close the socket and cancel any pending reconnection. No further
    /// events are produced once this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(session_id = %self.session_id, error = %e, "connection worker panicked");
            }
        }
        debug!(session_id = %self.session_id, generation = %self.generation, "connection stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SocketEnd {
    /// Stop was requested; do not reconnect.
    Stopped,
    /// The server went away or the socket errored.
    Dropped,
}

struct Worker {
    config: ConnectionConfig,
    generation: Generation,
    events: mpsc::UnboundedSender<GenerationEvent>,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedReceiver<ClientFrame>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut attempt = 0u32;

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                res = tokio_tungstenite::connect_async(self.config.url.as_str()) => res,
            };

            match connected {
                Ok((ws, _)) => {
                    attempt = 0;
                    info!(
                        session_id = %self.config.session_id,
                        generation = %self.generation,
                        "chat socket open"
                    );
                    self.set_state(ConnectionState::Open);
                    if let SocketEnd::Stopped = self.run_socket(ws).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %self.config.session_id,
                        url = %self.config.url,
                        error = %e,
                        "chat socket connect failed"
                    );
                }
            }

            self.set_state(ConnectionState::Disconnected);
            self.discard_unsent();

            attempt += 1;
            info!(
                session_id = %self.config.session_id,
                attempt,
                delay = ?self.config.reconnect_delay,
                "reconnecting after delay"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Drive one open socket until it drops or stop is requested.
    async fn run_socket(&mut self, ws: WsStream) -> SocketEnd {
        let cancel = self.cancel.clone();
        let (mut write, mut read) = ws.split();

        let handshake = ClientFrame::Handshake {
            token: self.config.token.as_str().to_string(),
            session_id: self.config.session_id.clone(),
        };
        if let Err(e) = write
            .send(tungstenite::Message::Text(encode(&handshake).into()))
            .await
        {
            warn!(error = %e, "failed to send handshake");
            return SocketEnd::Dropped;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(ConnectionState::Closing);
                    if let Err(e) = write.close().await {
                        debug!(error = %e, "error closing chat socket");
                    }
                    return SocketEnd::Stopped;
                }

                Some(frame) = self.outbound.recv() => {
                    let text = encode(&frame);
                    if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                        warn!(error = %e, "chat socket write failed");
                        return SocketEnd::Dropped;
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => match decode(&text) {
                            Ok(frame) => self.emit(ConnectionEvent::Frame(frame)),
                            Err(e) => {
                                warn!(error = %e, "dropping undecodable frame");
                            }
                        },
                        Some(Ok(tungstenite::Message::Close(_))) | None => {
                            info!(session_id = %self.config.session_id, "chat socket closed by server");
                            return SocketEnd::Dropped;
                        }
                        Some(Err(e)) => {
                            warn!(session_id = %self.config.session_id, error = %e, "chat socket error");
                            return SocketEnd::Dropped;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() == state {
            return;
        }
        self.state.send_replace(state);
        self.emit(ConnectionEvent::State(state));
    }

    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means the session client shut down; nothing to do.
        let _ = self.events.send((self.generation, event));
    }

    /// Messages queued against a socket that died are not replayed on the next one.
    fn discard_unsent(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "discarded unsent messages after disconnect");
        }
    }
}
