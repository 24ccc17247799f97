use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use streamspeech_streaming::SessionId;

use crate::error::ApiError;
use crate::state::AppState;

/// Read-only snapshot of one live session, for operational inspection.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub language: String,
    pub sampling_rate_hz: u32,
    pub flush_threshold_bytes: usize,
    pub buffered_bytes: usize,
    pub bytes_since_last_flush: usize,
}

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "active_sessions": state.streamer.registry().len(),
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let id: SessionId = session_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid session id '{session_id}'")))?;

    let summary = state.streamer.registry().with_session(id, |session| SessionSummary {
        session_id: id,
        language: session.config.language.clone(),
        sampling_rate_hz: session.config.sampling_rate_hz,
        flush_threshold_bytes: session.config.flush_threshold_bytes,
        buffered_bytes: session.audio_buffer.len(),
        bytes_since_last_flush: session.bytes_since_last_flush,
    })?;

    Ok(Json(summary))
}
