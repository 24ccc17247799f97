use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque handle for one microphone session.
///
/// Minted server-side on every accepted connection, so a transport that
/// recycles its own connection ids can never alias a previous session's
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),
    #[error("no session {0}")]
    NotFound(SessionId),
}

/// Immutable per-session parameters, fixed at connect time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub language: String,
    pub sampling_rate_hz: u32,
    pub bytes_per_sample: u32,
    /// Ordered post-processing directives, passed through to the ASR backend
    /// untouched.
    pub post_processors: Vec<String>,
    /// How many new buffered bytes must accrue before inference runs again
    /// while the speaker keeps talking.
    pub flush_threshold_bytes: usize,
}

impl SessionConfig {
    /// Derives the flush threshold from the sampling parameters:
    /// `sampling_rate_hz × (response_frequency_ms / 1000) × bytes_per_sample`,
    /// rounded down.
    pub fn new(
        language: String,
        sampling_rate_hz: u32,
        post_processors: Vec<String>,
        response_frequency_ms: u64,
        bytes_per_sample: u32,
    ) -> Self {
        let flush_threshold_bytes =
            (sampling_rate_hz as u64 * response_frequency_ms * bytes_per_sample as u64 / 1000)
                as usize;
        Self {
            language,
            sampling_rate_hz,
            bytes_per_sample,
            post_processors,
            flush_threshold_bytes,
        }
    }
}

/// Mutable state for one live session.
#[derive(Debug)]
pub struct SessionState {
    pub config: SessionConfig,
    /// All unflushed audio since the last utterance boundary. Append-only
    /// between flushes; cleared on silence and on stream (re)start.
    pub audio_buffer: Vec<u8>,
    /// Buffer length at which inference last ran (high-water mark), NOT
    /// simply "buffer is empty": mid-utterance flushes advance this without
    /// clearing the buffer.
    pub bytes_since_last_flush: usize,
}

impl SessionState {
    fn new(config: SessionConfig) -> Self {
        Self {
            config,
            audio_buffer: Vec::new(),
            bytes_since_last_flush: 0,
        }
    }
}

/// Tracks every live session by its handle.
///
/// Each connection task works only on its own entry; the map supports
/// concurrent insert/lookup/remove from independent tasks.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a new session. `DuplicateSession` is defensive: the
    /// transport mints a fresh id per connection, so a collision indicates a
    /// bug upstream rather than a recoverable condition.
    pub fn create(&self, id: SessionId, config: SessionConfig) -> Result<(), SessionError> {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession(id)),
            Entry::Vacant(entry) => {
                info!(
                    %id,
                    language = %config.language,
                    sampling_rate_hz = config.sampling_rate_hz,
                    flush_threshold_bytes = config.flush_threshold_bytes,
                    "session created"
                );
                entry.insert(SessionState::new(config));
                Ok(())
            }
        }
    }

    /// Runs `f` against the session's state while holding its map entry.
    ///
    /// Callers must not block or await inside `f`; snapshot what you need
    /// and do slow work (inference in particular) after returning.
    pub fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T, SessionError> {
        match self.sessions.get_mut(&id) {
            Some(mut state) => Ok(f(&mut state)),
            None => Err(SessionError::NotFound(id)),
        }
    }

    /// Starts a fresh stream segment: clears the buffer and high-water mark
    /// while language and thresholds persist.
    pub fn reset_buffer(&self, id: SessionId) -> Result<(), SessionError> {
        self.with_session(id, |state| {
            state.audio_buffer.clear();
            state.bytes_since_last_flush = 0;
        })
    }

    /// Removes the session. Idempotent: the explicit-disconnect and
    /// transport-close paths may race to clean up the same entry, so a
    /// missing id is a no-op. Returns whether this call removed the entry,
    /// letting the winner alone emit the termination event.
    pub fn destroy(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            info!(%id, remaining = self.sessions.len(), "session destroyed");
        } else {
            debug!(%id, "destroy for already-removed session");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
