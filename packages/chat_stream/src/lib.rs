//! Streaming chat client: wire frames, transcript assembly, a reconnecting
//! websocket connection, and the session client that ties them together.

pub mod assembler;
pub mod connection;
pub mod directory;
pub mod frame;
pub mod model;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{StreamAssembler, Transcript, TranscriptEvent};
pub use connection::{ConnectionManager, ConnectionState, DEFAULT_RECONNECT_DELAY, Generation};
pub use directory::{DirectoryError, HttpDirectory, SessionDirectory};
pub use frame::{ClientFrame, DecodeError, ServerFrame};
pub use model::{AuthToken, Message, Role, Session};
pub use session::{SessionClient, SessionClientConfig, SessionError, SessionView};
