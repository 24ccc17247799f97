use std::sync::Arc;

use tracing::{debug, warn};

use crate::asr::{AsrBackend, InferenceRequest};
use crate::session::{SessionError, SessionId, SessionRegistry};

/// Transcript emitted in place of real output when the ASR backend fails.
/// The session keeps running; clients can filter on the marker.
pub const ERROR_SENTINEL: &str = "<!--ERROR-->";

/// One inbound audio event for a session.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub audio: Vec<u8>,
    /// Accepted for wire compatibility; never overrides the session's fixed
    /// language.
    pub language_hint: Option<String>,
    pub is_speaking: bool,
    pub disconnect: bool,
}

/// Outbound events produced while processing a session's inbound stream,
/// delivered to the owning connection only, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transcript { text: String, language: String },
    Terminated,
}

/// What a single inbound event decided, captured under the registry lock so
/// inference can run after the lock is released.
struct FlushPlan {
    language: String,
    sampling_rate_hz: u32,
    post_processors: Vec<String>,
    /// Buffer snapshot for the silence- or threshold-triggered flush.
    cadence: Option<Vec<u8>>,
    /// Buffer snapshot for the final flush on disconnect.
    terminal: Option<Vec<u8>>,
}

/// Per-session streaming state machine.
///
/// Decides, for each inbound audio chunk, whether to run inference now, and
/// always runs inference once more on termination if unflushed audio
/// remains. Two flush kinds with deliberately different buffer behavior:
///
/// - **Utterance boundary** (`is_speaking == false`): forced flush, then the
///   buffer and high-water mark reset; the next chunk starts a new
///   utterance.
/// - **Partial-result cadence** (still speaking, threshold reached): flush
///   over the *full* accumulated utterance, advance the high-water mark,
///   keep the buffer. Each transcript refines the whole utterance so far.
pub struct StreamingController {
    registry: Arc<SessionRegistry>,
    asr: Arc<dyn AsrBackend>,
}

impl StreamingController {
    pub fn new(registry: Arc<SessionRegistry>, asr: Arc<dyn AsrBackend>) -> Self {
        Self { registry, asr }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// (Re)initializes the session's buffer for a fresh stream segment.
    /// A single connection may run several segments back to back.
    pub fn start_stream(&self, id: SessionId) -> Result<(), SessionError> {
        self.registry.reset_buffer(id)?;
        debug!(%id, "stream segment started");
        Ok(())
    }

    /// Processes one inbound chunk and returns the outbound events it
    /// produced. Events for a closed session yield `NotFound`; the caller
    /// logs and drops them.
    pub async fn process_chunk(
        &self,
        id: SessionId,
        chunk: AudioChunk,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let disconnect = chunk.disconnect;
        let mut plan = self.registry.with_session(id, |state| {
            if !chunk.audio.is_empty() {
                state.audio_buffer.extend_from_slice(&chunk.audio);
            }

            let mut cadence = None;
            if !chunk.is_speaking {
                // Silence is a strong segmentation signal: flush whatever
                // accumulated regardless of the threshold, then reset for
                // the next utterance.
                if !state.audio_buffer.is_empty() {
                    cadence = Some(state.audio_buffer.clone());
                }
                state.audio_buffer.clear();
                state.bytes_since_last_flush = 0;
            } else if state.audio_buffer.len() - state.bytes_since_last_flush
                >= state.config.flush_threshold_bytes
            {
                // Mid-utterance cadence: transcribe the whole utterance so
                // far and advance the high-water mark; the buffer stays.
                cadence = Some(state.audio_buffer.clone());
                state.bytes_since_last_flush = state.audio_buffer.len();
            }

            // A disconnect flushes once more even when the cadence branch
            // already flushed this event, so no trailing audio is lost.
            let terminal = if disconnect && !state.audio_buffer.is_empty() {
                Some(state.audio_buffer.clone())
            } else {
                None
            };

            FlushPlan {
                language: state.config.language.clone(),
                sampling_rate_hz: state.config.sampling_rate_hz,
                post_processors: state.config.post_processors.clone(),
                cadence,
                terminal,
            }
        })?;

        let mut events = Vec::new();
        if let Some(audio) = plan.cadence.take() {
            events.push(self.flush(id, audio, &plan).await);
        }
        if disconnect {
            if let Some(audio) = plan.terminal.take() {
                events.push(self.flush(id, audio, &plan).await);
            }
            if self.registry.destroy(id) {
                events.push(SessionEvent::Terminated);
            }
        }
        Ok(events)
    }

    /// Transport-loss teardown path. Converges with the explicit-disconnect
    /// path: final flush of any unflushed audio, then destroy. Safe to call
    /// after the session is already gone (returns no events).
    pub async fn close(&self, id: SessionId) -> Vec<SessionEvent> {
        let plan = self.registry.with_session(id, |state| FlushPlan {
            language: state.config.language.clone(),
            sampling_rate_hz: state.config.sampling_rate_hz,
            post_processors: state.config.post_processors.clone(),
            cadence: None,
            terminal: if state.audio_buffer.is_empty() {
                None
            } else {
                Some(state.audio_buffer.clone())
            },
        });

        let mut plan = match plan {
            Ok(plan) => plan,
            Err(_) => {
                debug!(%id, "close for already-terminated session");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if let Some(audio) = plan.terminal.take() {
            events.push(self.flush(id, audio, &plan).await);
        }
        if self.registry.destroy(id) {
            events.push(SessionEvent::Terminated);
        }
        events
    }

    /// Runs inference over a buffer snapshot (no registry lock held) and
    /// turns the result into a transcript event. Backend failures degrade to
    /// the sentinel transcript; they never tear down the session.
    async fn flush(&self, id: SessionId, audio: Vec<u8>, plan: &FlushPlan) -> SessionEvent {
        let bytes = audio.len();
        let request = InferenceRequest {
            audio,
            language: plan.language.clone(),
            sampling_rate_hz: plan.sampling_rate_hz,
            post_processors: plan.post_processors.clone(),
        };

        let text = match self.asr.transcribe(request).await {
            Ok(text) => {
                debug!(%id, bytes, backend = self.asr.name(), "flush transcribed");
                text
            }
            Err(e) => {
                warn!(%id, bytes, backend = self.asr.name(), %e, "inference failed, emitting sentinel");
                ERROR_SENTINEL.to_string()
            }
        };

        SessionEvent::Transcript {
            text,
            language: plan.language.clone(),
        }
    }
}
