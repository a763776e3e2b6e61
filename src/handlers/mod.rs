//! # HTTP Handlers
//!
//! REST endpoints for the voice agent.
//!
//! ## Modules:
//! - **agent**: the multi-turn conversation (`/agent/chat/{session_id}`)
//! - **speech**: single-shot speech and language endpoints plus plain uploads
//!
//! Routes are registered through [`configure`] so `main` and the tests build
//! the same application.

pub mod agent;   // Conversational turns and session management
pub mod speech;  // Single-shot TTS, LLM, STT, echo and upload

use crate::error::AppError;
use actix_multipart::{Field, Multipart};
use actix_web::web;
use futures_util::stream::StreamExt;

/// Name of the multipart field every upload endpoint reads.
pub const FILE_FIELD: &str = "file";

/// Largest upload accepted on any multipart endpoint (50 MB).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// A file pulled out of a multipart request.
#[derive(Debug)]
pub struct UploadedFile {
    /// Client-supplied file name, exactly as sent
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Register every route this service exposes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/audio", web::get().to(crate::websocket::audio_stream))
        .service(
            web::resource("/agent/chat/{session_id}")
                .route(web::post().to(agent::chat_turn))
                .route(web::delete().to(agent::reset_session)),
        )
        .route("/agent/chat/{session_id}/history", web::get().to(agent::session_history))
        .route("/tts", web::post().to(speech::text_to_speech))
        .route("/tts/echo", web::post().to(speech::echo))
        .route("/llm/query", web::post().to(speech::llm_query))
        .route("/transcribe/file", web::post().to(speech::transcribe_file))
        .route("/upload-audio", web::post().to(speech::upload_audio))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(crate::health::health_check))
                .route("/metrics", web::get().to(crate::health::detailed_metrics)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(crate::health::health_check));
}

/// Read the `file` field out of a multipart payload.
///
/// Other fields are drained and ignored. A missing `file` field, a broken
/// multipart stream or an oversized file is a `BadRequest`.
pub async fn read_file_field(mut payload: Multipart) -> Result<UploadedFile, AppError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let Some(content_disposition) = field.content_disposition() else {
            continue;
        };
        if content_disposition.get_name() != Some(FILE_FIELD) || upload.is_some() {
            // Drain so the next field can be read
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            }
            continue;
        }

        let filename = content_disposition.get_filename().map(|s| s.to_string());
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(AppError::BadRequest(format!(
                    "File too large (max: {} bytes)",
                    MAX_UPLOAD_BYTES
                )));
            }
            data.extend_from_slice(&chunk);
        }

        upload = Some(UploadedFile { filename, content_type, data });
    }

    upload.ok_or_else(|| AppError::BadRequest(format!("Missing multipart field '{}'", FILE_FIELD)))
}
