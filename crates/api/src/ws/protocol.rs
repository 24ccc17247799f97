//! JSON wire protocol for the microphone WebSocket.
//!
//! Messages use a `{"type": .., "data": ..}` envelope. Audio travels as
//! base64 text payloads; binary frames are not part of the protocol.

use serde::{Deserialize, Serialize};
use streamspeech_streaming::{SessionEvent, SessionId};

/// Client → server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// (Re)starts a stream segment on the current session.
    #[serde(rename = "stream:start")]
    StreamStart,
    /// One audio fragment with its control flags.
    #[serde(rename = "stream:audio")]
    StreamAudio(StreamAudio),
}

#[derive(Debug, Deserialize)]
pub struct StreamAudio {
    /// Base64-encoded PCM bytes; may be empty (control-only event).
    #[serde(default)]
    pub audio: String,
    /// Per-chunk language hint; accepted, never overrides the session
    /// language.
    #[serde(default)]
    pub language_code: Option<String>,
    pub is_speaking: bool,
    #[serde(default)]
    pub disconnect: bool,
}

/// Server → client messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "session:connected")]
    SessionConnected { session_id: SessionId },
    #[serde(rename = "stream:ready")]
    StreamReady,
    #[serde(rename = "stream:transcript")]
    Transcript { text: String, language: String },
    #[serde(rename = "stream:terminate")]
    Terminate,
    #[serde(rename = "stream:error")]
    Error { message: String },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Transcript { text, language } => {
                ServerMessage::Transcript { text, language }
            }
            SessionEvent::Terminated => ServerMessage::Terminate,
        }
    }
}
