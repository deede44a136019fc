//! SessionClient: binds a session and token to a connection manager and
//! exposes the transcript as observable state.
//!
//! All state lives in a single actor task. User calls, connection events and
//! history loads are all messages into that task, so transcript mutation is
//! strictly sequential and needs no locking. Observers read [`SessionView`]
//! snapshots from a `watch` channel that is updated after every step.
//!
//! ```text
//!   SessionClient (Clone)   commands    SessionActor          events
//!   ┌──────────────────┐  ─────────▶  ┌──────────────────┐ ◀──────── ConnectionManager
//!   │ .activate()      │              │ StreamAssembler  │ ◀──────── history loads
//!   │ .send_user_msg() │  ◀─────────  │ generation       │
//!   │ .subscribe()     │    watch     │ ConnectionManager│
//!   └──────────────────┘              └──────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::assembler::StreamAssembler;
use crate::connection::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState,
    DEFAULT_RECONNECT_DELAY, Generation, GenerationEvent,
};
use crate::directory::{DirectoryError, SessionDirectory};
use crate::frame::ServerFrame;
use crate::model::{AuthToken, Message, Session};

#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    /// Websocket endpoint of the streaming service.
    pub ws_url: String,
    /// Delay between a dropped connection and the next attempt.
    pub reconnect_delay: Duration,
}

impl SessionClientConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no credentials; log in first")]
    MissingCredentials,

    #[error("no active session")]
    NoActiveSession,

    #[error("message is empty")]
    EmptyMessage,

    #[error("not connected")]
    NotConnected,

    #[error("a response is still streaming")]
    TurnInProgress,

    #[error("superseded by a newer activation")]
    Preempted,

    #[error("session client shut down")]
    Shutdown,
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotConnected | ConnectionError::Stopped => Self::NotConnected,
        }
    }
}

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub session: Option<Session>,
    pub transcript: Vec<Message>,
    pub connection: ConnectionState,
    pub loading: bool,
    pub generation: Generation,
}

impl SessionView {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Open
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }
}

enum SessionCommand {
    Activate {
        session: Session,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SendUserMessage {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Deactivate {
        respond_to: oneshot::Sender<()>,
    },
}

/// Why a history fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryPurpose {
    /// Seed the transcript, then open the connection.
    Activation,
    /// Re-sync after a reconnect that interrupted a turn.
    Resync,
}

enum Internal {
    Connection(GenerationEvent),
    History {
        generation: Generation,
        purpose: HistoryPurpose,
        result: Result<Vec<Message>, DirectoryError>,
    },
}

/// Handle to the session actor. Cheap to clone; the actor shuts down (and
/// closes its connection) once every handle is dropped.
#[derive(Clone)]
pub struct SessionClient {
    sender: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionClient {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn spawn<D: SessionDirectory>(
        directory: D,
        token: AuthToken,
        config: SessionClientConfig,
    ) -> Self {
        let (sender, commands) = mpsc::channel(32);
        let (view_tx, view) = watch::channel(SessionView::default());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            directory: Arc::new(directory),
            token,
            config,
            commands,
            internal_tx,
            internal_rx,
            events_tx,
            events_rx,
            view: view_tx,
            assembler: StreamAssembler::new(),
            session: None,
            connection: None,
            connection_state: ConnectionState::Disconnected,
            generation: Generation::default(),
            pending: None,
            interrupted_turn: false,
        };
        tokio::spawn(actor.run());

        Self { sender, view }
    }

    /// Switch to `session`: stop the current connection, load its history,
    /// then connect. Resolves once the new connection manager is running.
    pub async fn activate(&self, session: Session) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Activate {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Echo `text` into the transcript and send it. Rejected, with the
    /// transcript untouched, when the text is blank, there is no session,
    /// the socket is not open, or a response is still loading.
    pub async fn send_user_message(&self, text: &str) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::SendUserMessage {
                text: text.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Leave the current session (logout). No reconnection is attempted.
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Deactivate { respond_to: tx })
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.view.borrow().is_connected()
    }

    pub fn is_loading(&self) -> bool {
        self.view.borrow().loading
    }

    pub fn generation(&self) -> Generation {
        self.view.borrow().generation
    }
}

struct PendingActivation {
    generation: Generation,
    respond_to: oneshot::Sender<Result<(), SessionError>>,
}

struct SessionActor<D> {
    directory: Arc<D>,
    token: AuthToken,
    config: SessionClientConfig,
    commands: mpsc::Receiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events_tx: mpsc::UnboundedSender<GenerationEvent>,
    events_rx: mpsc::UnboundedReceiver<GenerationEvent>,
    view: watch::Sender<SessionView>,
    assembler: StreamAssembler,
    session: Option<Session>,
    connection: Option<ConnectionManager>,
    /// Last state reported by the current generation's manager.
    connection_state: ConnectionState,
    generation: Generation,
    pending: Option<PendingActivation>,
    /// Set when the socket dropped mid-turn; triggers a history re-sync on reconnect.
    interrupted_turn: bool,
}

impl<D: SessionDirectory> SessionActor<D> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_internal(Internal::Connection(event));
                }
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal);
                }
            }
        }

        self.teardown().await;
        debug!("session actor stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Activate {
                session,
                respond_to,
            } => self.activate(session, respond_to).await,

            SessionCommand::SendUserMessage { text, respond_to } => {
                let result = self.send_user_message(&text);
                if let Err(ref e) = result {
                    debug!(error = %e, "user message rejected");
                }
                let _ = respond_to.send(result);
            }

            SessionCommand::Deactivate { respond_to } => {
                self.teardown().await;
                self.session = None;
                self.assembler.reset();
                self.publish();
                info!("session deactivated");
                let _ = respond_to.send(());
            }
        }
    }

    async fn activate(
        &mut self,
        session: Session,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    ) {
        if self.token.is_empty() {
            let _ = respond_to.send(Err(SessionError::MissingCredentials));
            return;
        }

        self.teardown().await;
        let generation = self.generation;
        info!(session_id = %session.id, %generation, "activating session");

        self.session = Some(session.clone());
        self.assembler.reset();
        self.publish();

        self.pending = Some(PendingActivation {
            generation,
            respond_to,
        });
        self.spawn_history_load(session.id, HistoryPurpose::Activation);
    }

    /// Stop the current manager and invalidate everything in flight for it.
    async fn teardown(&mut self) {
        self.generation = self.generation.next();
        if let Some(pending) = self.pending.take() {
            let _ = pending.respond_to.send(Err(SessionError::Preempted));
        }
        if let Some(conn) = self.connection.take() {
            conn.stop().await;
        }
        self.connection_state = ConnectionState::Disconnected;
        self.interrupted_turn = false;
    }

    fn spawn_history_load(&self, session_id: String, purpose: HistoryPurpose) {
        let directory = self.directory.clone();
        let token = self.token.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = directory.get_messages(&session_id, &token).await;
            let _ = tx.send(Internal::History {
                generation,
                purpose,
                result,
            });
        });
    }

    fn send_user_message(&mut self, text: &str) -> Result<(), SessionError> {
        if self.session.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let Some(conn) = self.connection.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        if self.connection_state != ConnectionState::Open {
            return Err(SessionError::NotConnected);
        }
        if self.assembler.is_loading() {
            return Err(SessionError::TurnInProgress);
        }

        conn.send_user_message(text)?;
        self.assembler.user_send(text);
        self.publish();
        Ok(())
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Connection((generation, event)) => {
                if generation != self.generation {
                    debug!(
                        stale = %generation,
                        current = %self.generation,
                        "dropping event from superseded connection"
                    );
                    return;
                }
                self.handle_connection_event(event);
            }
            Internal::History {
                generation,
                purpose,
                result,
            } => {
                if generation != self.generation {
                    debug!(stale = %generation, "dropping superseded history load");
                    return;
                }
                self.handle_history(purpose, result);
            }
        }
        self.publish();
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::State(state) => {
                let was_open = self.connection_state == ConnectionState::Open;
                self.connection_state = state;
                match state {
                    ConnectionState::Disconnected if was_open => {
                        if self.assembler.turn_in_flight() {
                            self.interrupted_turn = true;
                        }
                    }
                    ConnectionState::Open if self.interrupted_turn => {
                        self.interrupted_turn = false;
                        if let Some(id) = self.session.as_ref().map(|s| s.id.clone()) {
                            info!(session_id = %id, "reconnected mid-turn; re-syncing history");
                            self.spawn_history_load(id, HistoryPurpose::Resync);
                        }
                    }
                    _ => {}
                }
            }
            ConnectionEvent::Frame(frame) => {
                if self.connection_state != ConnectionState::Open {
                    debug!("ignoring frame received while not open");
                    return;
                }
                self.assembler.apply_frame(frame);
            }
        }
    }

    fn handle_history(
        &mut self,
        purpose: HistoryPurpose,
        result: Result<Vec<Message>, DirectoryError>,
    ) {
        match result {
            Ok(messages) => self.assembler.load_history(messages),
            Err(e) => {
                warn!(error = %e, ?purpose, "failed to load session history");
                if purpose == HistoryPurpose::Resync {
                    // The interrupted turn will never complete; stop loading.
                    self.assembler
                        .apply_frame(ServerFrame::Complete { content: None });
                }
            }
        }

        if purpose == HistoryPurpose::Activation {
            let Some(session) = self.session.as_ref() else {
                return;
            };
            let conn = ConnectionManager::open(
                ConnectionConfig {
                    url: self.config.ws_url.clone(),
                    token: self.token.clone(),
                    session_id: session.id.clone(),
                    reconnect_delay: self.config.reconnect_delay,
                },
                self.generation,
                self.events_tx.clone(),
            );
            self.connection = Some(conn);
            if let Some(pending) = self.pending.take() {
                debug_assert_eq!(pending.generation, self.generation);
                let _ = pending.respond_to.send(Ok(()));
            }
        }
    }

    fn publish(&self) {
        self.view.send_replace(SessionView {
            session: self.session.clone(),
            transcript: self.assembler.messages().to_vec(),
            connection: self.connection_state,
            loading: self.assembler.is_loading(),
            generation: self.generation,
        });
    }
}
