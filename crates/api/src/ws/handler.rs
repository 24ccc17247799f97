use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tracing::{debug, info, warn};

use streamspeech_config::StreamingSettings;
use streamspeech_streaming::{AudioChunk, SessionConfig, SessionEvent, SessionId};

use super::protocol::{ClientMessage, ServerMessage};
use crate::error::ApiError;
use crate::state::AppState;

/// Connect-time parameters, carried in the upgrade query string.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub language: String,
    #[serde(rename = "samplingRate")]
    pub sampling_rate: Option<u32>,
    /// JSON array string, e.g. `["numbers-post-processor"]`.
    #[serde(rename = "postProcessors")]
    pub post_processors: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // Invalid parameters reject the upgrade before any session exists.
    let config = match session_config(&params, &state.settings.streaming) {
        Ok(config) => config,
        Err(message) => {
            warn!(%message, "rejecting connection with invalid parameters");
            return ApiError::BadRequest(message).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, config))
}

fn session_config(
    params: &ConnectParams,
    streaming: &StreamingSettings,
) -> Result<SessionConfig, String> {
    if params.language.trim().is_empty() {
        return Err("language is required".to_string());
    }

    let sampling_rate_hz = params.sampling_rate.unwrap_or(44100);
    if sampling_rate_hz == 0 {
        return Err("samplingRate must be positive".to_string());
    }

    let post_processors: Vec<String> = match &params.post_processors {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| format!("postProcessors must be a JSON string array: {e}"))?,
        None => Vec::new(),
    };

    let config = SessionConfig::new(
        params.language.clone(),
        sampling_rate_hz,
        post_processors,
        streaming.response_frequency_ms,
        streaming.bytes_per_sample,
    );
    if config.flush_threshold_bytes == 0 {
        return Err(
            "samplingRate and response_frequency_ms yield a zero flush threshold".to_string(),
        );
    }

    Ok(config)
}

async fn handle_socket(socket: WebSocket, state: AppState, config: SessionConfig) {
    let session_id = SessionId::new();
    if let Err(e) = state.streamer.registry().create(session_id, config) {
        warn!(%session_id, %e, "could not register session");
        return;
    }
    info!(%session_id, "microphone session connected");

    let (mut sender, mut receiver) = socket.split();
    send(&mut sender, &ServerMessage::SessionConnected { session_id }).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if !handle_client_message(&state, session_id, &mut sender, &text).await {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(%session_id, %e, "WebSocket error");
                break;
            }
            _ => {
                debug!(%session_id, "ignoring non-text frame");
            }
        }
    }

    // Explicit disconnect and transport loss converge here: close() runs the
    // final flush and teardown, and is a no-op if the disconnect event
    // already removed the session.
    for event in state.streamer.close(session_id).await {
        send(&mut sender, &event.into()).await;
    }
    info!(%session_id, "microphone session closed");
}

/// Handles one client message. Returns `false` when the receive loop should
/// stop (session terminated or event arrived for a closed session).
async fn handle_client_message(
    state: &AppState,
    session_id: SessionId,
    sender: &mut SplitSink<WebSocket, Message>,
    text: &str,
) -> bool {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%session_id, %e, "ignoring unparseable client message");
            return true;
        }
    };

    match msg {
        ClientMessage::StreamStart => match state.streamer.start_stream(session_id) {
            Ok(()) => {
                send(sender, &ServerMessage::StreamReady).await;
                true
            }
            Err(e) => {
                warn!(%session_id, %e, "stream start for closed session");
                send(sender, &ServerMessage::Error { message: e.to_string() }).await;
                false
            }
        },
        ClientMessage::StreamAudio(audio) => {
            let bytes = match BASE64.decode(audio.audio.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%session_id, %e, "invalid base64 audio payload");
                    send(
                        sender,
                        &ServerMessage::Error { message: "invalid base64 audio".to_string() },
                    )
                    .await;
                    return true;
                }
            };

            let chunk = AudioChunk {
                audio: bytes,
                language_hint: audio.language_code,
                is_speaking: audio.is_speaking,
                disconnect: audio.disconnect,
            };

            match state.streamer.process_chunk(session_id, chunk).await {
                Ok(events) => {
                    let mut keep_going = true;
                    for event in events {
                        if matches!(event, SessionEvent::Terminated) {
                            keep_going = false;
                        }
                        send(sender, &event.into()).await;
                    }
                    keep_going
                }
                Err(e) => {
                    // Late event for an unknown/closed session: drop with a
                    // log, never crash the server.
                    warn!(%session_id, %e, "dropping event for closed session");
                    send(sender, &ServerMessage::Error { message: e.to_string() }).await;
                    false
                }
            }
        }
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(text) => {
            if let Err(e) = sender.send(Message::text(text)).await {
                debug!(%e, "failed to deliver message");
            }
        }
        Err(e) => {
            warn!(%e, "failed to serialize server message");
        }
    }
}
