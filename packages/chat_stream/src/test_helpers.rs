//! Shared test fixtures: a real websocket server on a random port and an
//! in-memory session directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, tungstenite};

use crate::connection::GenerationEvent;
use crate::directory::{DirectoryError, SessionDirectory};
use crate::frame::{ClientFrame, ServerFrame, decode_client};
use crate::model::{AuthToken, Message, Session};

/// Timeout for each async operation in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) -> GenerationEvent {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

/// Websocket server that hands every handshaken connection to the test.
pub struct MockServer {
    url: String,
    peers: mpsc::UnboundedReceiver<MockPeer>,
    accepted: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("no local addr");
        let (tx, peers) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let paused = Arc::new(AtomicBool::new(false));

        let accepted_ref = accepted.clone();
        let paused_ref = paused.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if paused_ref.load(Ordering::SeqCst) {
                    // Refuse by hanging up before the websocket upgrade.
                    drop(tcp);
                    continue;
                }
                let tx = tx.clone();
                let accepted = accepted_ref.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    let handshake = match ws.next().await {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            decode_client(&text).expect("first frame must be a client frame")
                        }
                        _ => return,
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(MockPeer { handshake, ws });
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws/chat"),
            peers,
            accepted,
            paused,
            task,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Number of connections that completed the handshake.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Reject new connections until `resume`.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub async fn next_peer(&mut self) -> MockPeer {
        timeout(TEST_TIMEOUT, self.peers.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("mock server stopped")
    }

    /// Assert that no client connects within `wait`.
    pub async fn expect_no_peer(&mut self, wait: Duration) {
        if let Ok(Some(peer)) = timeout(wait, self.peers.recv()).await {
            panic!("unexpected connection with handshake {:?}", peer.handshake);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server side of one client connection.
pub struct MockPeer {
    pub handshake: ClientFrame,
    ws: WebSocketStream<TcpStream>,
}

impl MockPeer {
    pub fn session_id(&self) -> Option<&str> {
        match &self.handshake {
            ClientFrame::Handshake { session_id, .. } => Some(session_id),
            ClientFrame::UserMessage { .. } => None,
        }
    }

    pub async fn send_frame(&mut self, frame: &ServerFrame) {
        let text = serde_json::to_string(frame).expect("serialize server frame");
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(tungstenite::Message::Text(text.to_string().into()))
            .await
            .expect("mock peer send failed");
    }

    pub async fn recv_client_frame(&mut self) -> ClientFrame {
        loop {
            let msg = timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client hung up")
                .expect("client socket error");
            if let tungstenite::Message::Text(text) = msg {
                return decode_client(&text).expect("undecodable client frame");
            }
        }
    }

    /// Assert the client sends nothing within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(tungstenite::Message::Text(text)))) =
            timeout(wait, self.ws.next()).await
        {
            panic!("unexpected client frame: {text}");
        }
    }

    /// Hang up from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Wait for the client to close the socket. Returns false on timeout.
    pub async fn wait_closed(&mut self) -> bool {
        let closed = async {
            loop {
                match self.ws.next().await {
                    Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        };
        timeout(TEST_TIMEOUT, closed).await.is_ok()
    }
}

pub fn session(id: &str) -> Session {
    Session {
        id: id.to_string(),
        title: Some(format!("Session {id}")),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

/// In-memory directory. Histories can be gated so a test controls when a
/// `get_messages` call completes.
#[derive(Clone, Default)]
pub struct FakeDirectory {
    inner: Arc<FakeDirectoryInner>,
}

#[derive(Default)]
struct FakeDirectoryInner {
    sessions: Mutex<Vec<Session>>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<Vec<String>>,
    history_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_history(self, session_id: &str, messages: Vec<Message>) -> Self {
        self.set_history(session_id, messages).await;
        self
    }

    pub async fn set_history(&self, session_id: &str, messages: Vec<Message>) {
        self.inner
            .histories
            .lock()
            .await
            .insert(session_id.to_string(), messages);
    }

    /// Make `get_messages(session_id)` block until the returned notify fires.
    pub async fn gate(&self, session_id: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.inner
            .gates
            .lock()
            .await
            .insert(session_id.to_string(), notify.clone());
        notify
    }

    pub async fn fail_history(&self, session_id: &str) {
        self.inner
            .failing
            .lock()
            .await
            .push(session_id.to_string());
    }

    pub fn history_calls(&self) -> usize {
        self.inner.history_calls.load(Ordering::SeqCst)
    }
}

impl SessionDirectory for FakeDirectory {
    async fn list_sessions(&self, _token: &AuthToken) -> Result<Vec<Session>, DirectoryError> {
        Ok(self.inner.sessions.lock().await.clone())
    }

    async fn create_session(&self, _token: &AuthToken) -> Result<Session, DirectoryError> {
        let mut sessions = self.inner.sessions.lock().await;
        let created = session(&format!("new-{}", sessions.len() + 1));
        sessions.insert(0, created.clone());
        Ok(created)
    }

    async fn get_messages(
        &self,
        session_id: &str,
        _token: &AuthToken,
    ) -> Result<Vec<Message>, DirectoryError> {
        self.inner.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.inner.gates.lock().await.get(session_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.inner.failing.lock().await.iter().any(|s| s == session_id) {
            return Err(DirectoryError::Status {
                status: 500,
                body: "history unavailable".into(),
            });
        }
        Ok(self
            .inner
            .histories
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}
