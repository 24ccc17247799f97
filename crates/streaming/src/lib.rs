//! Per-session streaming speech-recognition core.
//!
//! A [`SessionRegistry`] maps each live connection to exactly one
//! [`SessionState`]; a [`StreamingController`] ingests audio chunks and
//! control flags per session, decides when to run inference over the
//! accumulated buffer, and yields transcript events for the owning
//! connection. Inference itself is a pluggable [`AsrBackend`].

pub mod asr;
pub mod controller;
pub mod session;

pub use asr::{AsrBackend, DurationBackend, InferenceRequest};
pub use controller::{AudioChunk, ERROR_SENTINEL, SessionEvent, StreamingController};
pub use session::{SessionConfig, SessionError, SessionId, SessionRegistry, SessionState};

#[cfg(feature = "remote-ulca")]
pub use asr::RemoteUlcaBackend;
