use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::json;

use super::{AsrBackend, InferenceRequest};

/// Remote ASR backend speaking the ULCA recognize REST API.
///
/// Wraps the buffered raw PCM into a mono 16-bit WAV, base64-encodes it and
/// POSTs it to `{endpoint}/{language}`. The transcript is taken from
/// `output[0].source` in the JSON reply; any transport or shape mismatch is
/// an ordinary error and the controller degrades it to the sentinel.
pub struct RemoteUlcaBackend {
    endpoint: String,
    service_id: String,
    client: reqwest::Client,
}

impl RemoteUlcaBackend {
    pub fn new(endpoint: &str, service_id: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            service_id: service_id.unwrap_or("").to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Encodes raw little-endian 16-bit PCM as a mono WAV container.
    fn wav_encode(audio: &[u8], sampling_rate_hz: u32) -> anyhow::Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: sampling_rate_hz,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for sample in audio.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl AsrBackend for RemoteUlcaBackend {
    async fn transcribe(&self, request: InferenceRequest) -> anyhow::Result<String> {
        let wav = Self::wav_encode(&request.audio, request.sampling_rate_hz)?;
        let audio_content = BASE64.encode(wav);

        let mut config = json!({
            "language": { "sourceLanguage": request.language },
            "audioFormat": "wav",
            "samplingRate": request.sampling_rate_hz,
            "encoding": "base64",
        });
        if !request.post_processors.is_empty() {
            config["postProcessors"] = json!(request.post_processors);
        }

        let payload = json!({
            "serviceId": self.service_id,
            "audio": [{ "audioContent": audio_content }],
            "config": config,
        });

        let url = format!("{}/{}", self.endpoint, request.language);
        let response: serde_json::Value = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ULCA request to '{url}' failed: {e}"))?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("ULCA response was not JSON: {e}"))?;

        response["output"][0]["source"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("ULCA response missing output[0].source"))
    }

    fn name(&self) -> &str {
        "remote_ulca"
    }
}
