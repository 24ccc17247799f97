pub mod duration;

#[cfg(feature = "remote-ulca")]
pub mod remote_ulca;

pub use duration::DurationBackend;

#[cfg(feature = "remote-ulca")]
pub use remote_ulca::RemoteUlcaBackend;

use async_trait::async_trait;

/// Request to transcribe the audio buffered for one session.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Raw PCM bytes as received from the client.
    pub audio: Vec<u8>,
    /// The session's fixed language.
    pub language: String,
    pub sampling_rate_hz: u32,
    /// Ordered post-processing directives, opaque to the core.
    pub post_processors: Vec<String>,
}

/// Trait for pluggable ASR backends.
///
/// The controller treats inference as a black box: it hands over a private
/// snapshot of the session buffer and expects transcript text back. Errors
/// are degraded to a sentinel transcript by the caller, so implementations
/// should just return them.
#[async_trait]
pub trait AsrBackend: Send + Sync + 'static {
    async fn transcribe(&self, request: InferenceRequest) -> anyhow::Result<String>;

    /// Human-readable backend name (for logs).
    fn name(&self) -> &str;
}
