use std::sync::Arc;

use anyhow::Context;
use streamspeech_api::{build_router, state::AppState};
use streamspeech_config::Settings;
use streamspeech_streaming::{AsrBackend, DurationBackend, SessionRegistry, StreamingController};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::load().context("failed to load settings")?);
    let asr = build_backend(&settings)?;
    let registry = Arc::new(SessionRegistry::new());
    let streamer = Arc::new(StreamingController::new(registry, asr));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "streamspeech server listening");

    let router = build_router(AppState { settings, streamer });
    axum::serve(listener, router).await?;
    Ok(())
}

fn build_backend(settings: &Settings) -> anyhow::Result<Arc<dyn AsrBackend>> {
    let backend: Arc<dyn AsrBackend> = match settings.streaming.backend.as_str() {
        "duration" => Arc::new(DurationBackend::new(settings.streaming.bytes_per_sample)),
        #[cfg(feature = "remote-ulca")]
        "remote_ulca" => {
            let endpoint = settings
                .streaming
                .ulca_endpoint
                .as_deref()
                .context("streaming.ulca_endpoint is required for the remote_ulca backend")?;
            Arc::new(streamspeech_streaming::RemoteUlcaBackend::new(
                endpoint,
                settings.streaming.ulca_service_id.as_deref(),
            ))
        }
        other => {
            warn!(backend = %other, "unknown ASR backend, falling back to duration mock");
            Arc::new(DurationBackend::new(settings.streaming.bytes_per_sample))
        }
    };
    info!(backend = backend.name(), "ASR backend selected");
    Ok(backend)
}
