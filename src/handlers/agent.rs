//! # Conversational Agent Handlers
//!
//! ## Available Endpoints:
//! - `POST /agent/chat/{session_id}` - Run one spoken turn (multipart `file`)
//! - `DELETE /agent/chat/{session_id}` - Forget a session's history
//! - `GET /agent/chat/{session_id}/history` - Inspect a session's turns

use super::read_file_field;
use crate::agent::history::Turn;
use crate::{error::AppError, state::AppState};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

/// Response body for `DELETE /agent/chat/{session_id}`.
#[derive(Debug, Serialize)]
pub struct SessionResetResponse {
    pub session_id: String,
    /// Whether there was a history to remove
    pub removed: bool,
}

/// Response body for `GET /agent/chat/{session_id}/history`.
#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

/// Run one conversational turn for `session_id`.
///
/// ## Endpoint: `POST /agent/chat/{session_id}`
///
/// ## Response:
/// ```json
/// {
///   "user_transcript": "what's the weather like",
///   "bot_text": "I can't check the weather, but ...",
///   "audio_url": "https://..."
/// }
/// ```
/// Service outages degrade the body (`null` transcript or audio, fallback text)
/// but never the status code.
pub async fn chat_turn(
    path: web::Path<String>,
    payload: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let upload = read_file_field(payload).await?;

    info!(session_id = %session_id, bytes = upload.data.len(), "Agent chat turn");
    let response = app_state.orchestrator.handle_turn(&session_id, &upload.data).await;

    Ok(HttpResponse::Ok().json(response))
}

/// ## Endpoint: `DELETE /agent/chat/{session_id}`
pub async fn reset_session(
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let turns = app_state.sessions.history_len(&session_id).await;
    let removed = app_state.sessions.remove(&session_id).await;
    info!(session_id = %session_id, removed, turns, "Session reset");

    Ok(HttpResponse::Ok().json(SessionResetResponse { session_id, removed }))
}

/// ## Endpoint: `GET /agent/chat/{session_id}/history`
///
/// Unknown sessions report an empty list rather than a 404.
pub async fn session_history(
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let turns = app_state.sessions.snapshot(&session_id).await.unwrap_or_default();

    Ok(HttpResponse::Ok().json(SessionHistoryResponse { session_id, turns }))
}
