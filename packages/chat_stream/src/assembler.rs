//! Folds inbound frames and local sends into a transcript.
//!
//! [`Transcript::apply`] is the pure reducer. [`StreamAssembler`] wraps it and
//! additionally tracks whether a turn is loading.
//!
//! The transcript keeps an explicit open-message marker rather than treating
//! "the last assistant entry" as the streaming target: chunks only extend the
//! entry the marker points at, and the marker is cleared by `complete`,
//! `error` and `history`.

use crate::frame::ServerFrame;
use crate::model::{Message, Role};

/// Everything the assembler reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// A decoded inbound frame.
    Frame(ServerFrame),
    /// The local user sent a message (optimistic echo).
    UserSend(String),
}

impl From<ServerFrame> for TranscriptEvent {
    fn from(frame: ServerFrame) -> Self {
        Self::Frame(frame)
    }
}

/// Ordered, append-only list of messages plus the open assistant marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Index of the assistant message currently receiving chunks.
    open: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A closed transcript seeded with prior history.
    pub fn from_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            open: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The assistant message currently receiving chunks, if any.
    pub fn open_message(&self) -> Option<&Message> {
        self.open_index().map(|i| &self.messages[i])
    }

    pub fn has_open_message(&self) -> bool {
        self.open_index().is_some()
    }

    /// The marker only counts while it still names the last entry.
    fn open_index(&self) -> Option<usize> {
        match self.open {
            Some(i) if i + 1 == self.messages.len() => Some(i),
            _ => None,
        }
    }

    /// Pure reduction step.
    pub fn apply(mut self, event: &TranscriptEvent) -> Self {
        match event {
            TranscriptEvent::Frame(ServerFrame::History { content }) => {
                return Self::from_history(content.clone());
            }
            TranscriptEvent::Frame(ServerFrame::Chunk { content }) => match self.open_index() {
                Some(i) => self.messages[i].content.push_str(content),
                None => self.push_open(Message::assistant(content.as_str())),
            },
            TranscriptEvent::Frame(ServerFrame::Complete { .. }) => {
                self.open = None;
            }
            TranscriptEvent::Frame(ServerFrame::Error { content }) => {
                self.open = None;
                self.messages.push(Message::error(content.as_str()));
            }
            TranscriptEvent::UserSend(text) => {
                self.open = None;
                self.messages.push(Message::user(text.as_str()));
                self.push_open(Message::assistant(""));
            }
        }
        self
    }

    fn push_open(&mut self, message: Message) {
        debug_assert_eq!(message.role, Role::Assistant);
        self.messages.push(message);
        self.open = Some(self.messages.len() - 1);
    }
}

/// Imperative wrapper: a transcript plus the "turn is loading" flag.
#[derive(Debug, Clone, Default)]
pub struct StreamAssembler {
    transcript: Transcript,
    loading: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True while a response is expected or streaming.
    pub fn turn_in_flight(&self) -> bool {
        self.loading || self.transcript.has_open_message()
    }

    /// Drop everything, e.g. when switching sessions.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, event: &TranscriptEvent) {
        match event {
            TranscriptEvent::Frame(ServerFrame::History { .. })
            | TranscriptEvent::Frame(ServerFrame::Complete { .. })
            | TranscriptEvent::Frame(ServerFrame::Error { .. }) => self.loading = false,
            TranscriptEvent::UserSend(_) => self.loading = true,
            TranscriptEvent::Frame(ServerFrame::Chunk { .. }) => {}
        }
        let transcript = std::mem::take(&mut self.transcript);
        self.transcript = transcript.apply(event);
    }

    pub fn apply_frame(&mut self, frame: ServerFrame) {
        self.apply(&TranscriptEvent::Frame(frame));
    }

    pub fn user_send(&mut self, text: impl Into<String>) {
        self.apply(&TranscriptEvent::UserSend(text.into()));
    }

    /// Replace the transcript with history from the directory service.
    pub fn load_history(&mut self, messages: Vec<Message>) {
        self.apply_frame(ServerFrame::History { content: messages });
    }
}
