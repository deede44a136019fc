//! Wire frames exchanged over the chat websocket, one JSON object per text message.
//!
//! Outbound frames are untagged objects (`{"token", "session_id"}` for the
//! handshake, `{"user_message"}` for input). Inbound frames carry a `"type"`
//! field naming their kind.

use serde::{Deserialize, Serialize};

use crate::model::Message;

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Sent exactly once right after the socket opens.
    Handshake { token: String, session_id: String },
    /// A new line of user input.
    UserMessage { user_message: String },
}

/// Frames the server sends to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Full prior transcript, in order.
    History { content: Vec<Message> },
    /// Incremental text for the open assistant message.
    Chunk { content: String },
    /// End of the current assistant turn. Some servers echo the full
    /// response text here; it is informational only.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// The current turn failed upstream.
    Error { content: String },
}

const SERVER_KINDS: &[&str] = &["history", "chunk", "complete", "error"];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has no \"type\" tag")]
    MissingKind,

    #[error("unrecognized frame kind: {0}")]
    UnknownKind(String),
}

/// Serialize an outbound frame. Never fails for any `ClientFrame`.
pub fn encode(frame: &ClientFrame) -> String {
    let value = match frame {
        ClientFrame::Handshake { token, session_id } => serde_json::json!({
            "token": token,
            "session_id": session_id,
        }),
        ClientFrame::UserMessage { user_message } => serde_json::json!({
            "user_message": user_message,
        }),
    };
    value.to_string()
}

/// Parse an inbound frame.
pub fn decode(text: &str) -> Result<ServerFrame, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.as_str(),
        Some(other) => return Err(DecodeError::UnknownKind(other.to_string())),
        None => return Err(DecodeError::MissingKind),
    };
    if !SERVER_KINDS.contains(&kind) {
        return Err(DecodeError::UnknownKind(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Parse a client frame. Servers (and test servers) use this to read the handshake.
pub fn decode_client(text: &str) -> Result<ClientFrame, DecodeError> {
    Ok(serde_json::from_str(text)?)
}
