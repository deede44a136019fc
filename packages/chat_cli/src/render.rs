//! Terminal rendering of [`SessionView`] snapshots.
//!
//! The renderer remembers what it has already printed and turns each new
//! snapshot into only the text that changed, so streamed replies appear
//! incrementally. When the transcript is replaced (history reload, session
//! switch) it redraws from the top.

use chat_stream::{Message, Role, Session, SessionView};

pub fn session_line(session: &Session) -> String {
    format!(
        "{:<38} {:<30} {}",
        session.id,
        session.display_title(),
        session.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn prefix(role: Role) -> &'static str {
    match role {
        Role::User => "you> ",
        Role::Assistant => "assistant> ",
        Role::Error => "error> ",
    }
}

/// An assistant placeholder is not printed until its first chunk arrives.
fn is_placeholder(message: &Message) -> bool {
    message.role == Role::Assistant && message.content.is_empty()
}

#[derive(Debug, Default)]
pub struct Renderer {
    session_id: Option<String>,
    /// Entries as printed so far; the last may be a prefix of its live content.
    printed: Vec<Message>,
    /// The last printed line has no trailing newline yet.
    line_open: bool,
    connected: Option<bool>,
    loading: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for the transition to `view`.
    pub fn render(&mut self, view: &SessionView) -> String {
        let mut out = String::new();

        if view.session_id() != self.session_id.as_deref() {
            self.close_line(&mut out);
            self.printed.clear();
            self.session_id = view.session_id().map(str::to_string);
            if let Some(session) = &view.session {
                out.push_str(&format!("── {} ({}) ──\n", session.display_title(), session.id));
            }
        }

        let connected = view.is_connected();
        if self.connected != Some(connected) {
            // Starting out disconnected is not news.
            if self.connected.is_some() || connected {
                self.close_line(&mut out);
                out.push_str(if connected {
                    "[connected]\n"
                } else {
                    "[disconnected]\n"
                });
            }
            self.connected = Some(connected);
        }

        if !self.is_continuation(&view.transcript) {
            self.close_line(&mut out);
            if !self.printed.is_empty() {
                out.push_str("[transcript reloaded]\n");
            }
            self.printed.clear();
        }
        self.extend_last(&view.transcript, &mut out);
        for message in &view.transcript[self.printed.len()..] {
            self.close_line(&mut out);
            if !is_placeholder(message) {
                out.push_str(prefix(message.role));
                out.push_str(&message.content);
                self.line_open = true;
            }
            self.printed.push(message.clone());
        }

        let streaming = view.loading
            && view
                .transcript
                .last()
                .is_some_and(|m| m.role == Role::Assistant);
        if self.line_open && !streaming {
            self.close_line(&mut out);
        }

        if view.loading && !self.loading && view.transcript.last().is_some_and(is_placeholder) {
            self.close_line(&mut out);
            out.push_str("thinking...\n");
        }
        self.loading = view.loading;

        out
    }

    /// Whether `transcript` only appends to what was already printed.
    fn is_continuation(&self, transcript: &[Message]) -> bool {
        let Some((last, done)) = self.printed.split_last() else {
            return true;
        };
        let n = self.printed.len();
        if transcript.len() < n || transcript[..n - 1] != *done {
            return false;
        }
        let live = &transcript[n - 1];
        live.role == last.role && live.content.starts_with(&last.content)
    }

    fn extend_last(&mut self, transcript: &[Message], out: &mut String) {
        let n = self.printed.len();
        let Some(last) = self.printed.last_mut() else {
            return;
        };
        let live = &transcript[n - 1];
        if live.content.len() == last.content.len() {
            return;
        }
        let suffix = &live.content[last.content.len()..];
        if last.content.is_empty() {
            // Placeholder receiving its first text.
            if self.line_open {
                out.push('\n');
            }
            out.push_str(prefix(live.role));
        }
        out.push_str(suffix);
        last.content.push_str(suffix);
        self.line_open = true;
    }

    fn close_line(&mut self, out: &mut String) {
        if self.line_open {
            out.push('\n');
            self.line_open = false;
        }
    }
}
