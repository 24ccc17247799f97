use async_trait::async_trait;

use super::{AsrBackend, InferenceRequest};

/// Mock backend: "transcribes" a buffer to its audio duration in seconds.
///
/// Useful for exercising the full streaming cadence without a recognizer:
/// the emitted numbers grow with the utterance and reset at each boundary,
/// which makes flush behavior visible from the client side.
pub struct DurationBackend {
    bytes_per_sample: u32,
}

impl DurationBackend {
    pub fn new(bytes_per_sample: u32) -> Self {
        Self { bytes_per_sample }
    }
}

#[async_trait]
impl AsrBackend for DurationBackend {
    async fn transcribe(&self, request: InferenceRequest) -> anyhow::Result<String> {
        let bytes_per_second = (self.bytes_per_sample * request.sampling_rate_hz) as f64;
        let seconds = request.audio.len() as f64 / bytes_per_second;
        Ok(format!("{seconds}"))
    }

    fn name(&self) -> &str {
        "duration"
    }
}
