use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Listener address for the API server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Server-wide streaming knobs shared by every session.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingSettings {
    /// How often (in milliseconds of buffered audio) a transcript should be
    /// produced while the speaker keeps talking.
    #[serde(default = "default_response_frequency_ms")]
    pub response_frequency_ms: u64,
    /// Sample width of the incoming PCM stream.
    #[serde(default = "default_bytes_per_sample")]
    pub bytes_per_sample: u32,
    /// ASR backend to use: "duration" (mock) or "remote_ulca".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// ULCA recognize endpoint (for the remote_ulca backend).
    #[serde(default)]
    pub ulca_endpoint: Option<String>,
    /// ULCA service identifier sent with each recognize request.
    #[serde(default)]
    pub ulca_service_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub streaming: StreamingSettings,
}

impl Settings {
    /// Loads settings from an optional `streamspeech` config file, then
    /// applies `STREAMSPEECH__`-prefixed environment overrides
    /// (e.g. `STREAMSPEECH__SERVER__PORT=9000`).
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("streamspeech").required(false))
            .add_source(Environment::with_prefix("STREAMSPEECH").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            response_frequency_ms: default_response_frequency_ms(),
            bytes_per_sample: default_bytes_per_sample(),
            backend: default_backend(),
            ulca_endpoint: None,
            ulca_service_id: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            streaming: StreamingSettings::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_response_frequency_ms() -> u64 {
    2000
}

fn default_bytes_per_sample() -> u32 {
    2
}

fn default_backend() -> String {
    "duration".to_string()
}
