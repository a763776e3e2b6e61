//! # Single-Shot Speech Handlers
//!
//! Each endpoint drives at most one or two remote services and keeps no history.
//!
//! ## Available Endpoints:
//! - `POST /tts` - Synthesize `{text}` in the default voice style
//! - `POST /llm/query` - Ask the language model `{text}` once
//! - `POST /transcribe/file` - Transcribe an uploaded file
//! - `POST /tts/echo` - Transcribe an upload and speak it back
//! - `POST /upload-audio` - Store an upload under `{upload_dir}/files`

use super::{read_file_field, UploadedFile};
use crate::agent::TtsResponse;
use crate::{error::AppError, state::AppState};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::{error, info};

/// Subdirectory of the upload directory that `/upload-audio` writes into, so
/// client-named files never share a namespace with `stream_*` captures.
pub const UPLOADS_SUBDIR: &str = "files";

/// Request body for `/tts` and `/llm/query`.
#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct LlmResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    /// Empty when nothing usable was heard
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Name the file was stored under
    pub filename: String,
    pub content_type: Option<String>,
    pub size: usize,
}

fn require_text(request: TextRequest) -> Result<String, AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("Field 'text' must not be empty".to_string()));
    }
    Ok(request.text)
}

/// ## Endpoint: `POST /tts`
///
/// `audio_url` is `null` when synthesis fails; `bot_text` echoes the input.
pub async fn text_to_speech(
    body: web::Json<TextRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let text = require_text(body.into_inner())?;
    let style = &app_state.config.agent.default_style;

    let audio_url = app_state.orchestrator.synthesize_only(&text, style).await;

    Ok(HttpResponse::Ok().json(TtsResponse {
        audio_url,
        bot_text: Some(text),
    }))
}

/// ## Endpoint: `POST /llm/query`
///
/// Answers with the fallback phrase when the model is unavailable.
pub async fn llm_query(
    body: web::Json<TextRequest>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let text = require_text(body.into_inner())?;
    let response = app_state.orchestrator.query_only(&text).await;

    Ok(HttpResponse::Ok().json(LlmResponse { response }))
}

/// ## Endpoint: `POST /transcribe/file`
pub async fn transcribe_file(
    payload: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let upload = read_file_field(payload).await?;
    let transcript = app_state
        .orchestrator
        .transcribe_only(&upload.data)
        .await
        .unwrap_or_default();

    Ok(HttpResponse::Ok().json(TranscriptResponse { transcript }))
}

/// ## Endpoint: `POST /tts/echo`
///
/// Both fields are `null` when the upload couldn't be transcribed.
pub async fn echo(
    payload: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let upload = read_file_field(payload).await?;
    let style = &app_state.config.agent.default_style;
    let response = app_state.orchestrator.echo(&upload.data, style).await;

    Ok(HttpResponse::Ok().json(response))
}

/// ## Endpoint: `POST /upload-audio`
///
/// Only the final component of the client's file name is used, so uploads can't
/// land outside their directory. Existing files are never replaced: a taken name
/// gets a uuid prefix, and the response reports the name actually used.
pub async fn upload_audio(
    payload: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let UploadedFile { filename, content_type, data } = read_file_field(payload).await?;

    let dir = app_state.config.storage.upload_dir.join(UPLOADS_SUBDIR);
    let requested = storage_name(filename.as_deref());
    let size = data.len();

    let stored_name = web::block(move || store_upload(&dir, &requested, &data))
        .await
        .map_err(|e| AppError::Internal(format!("Upload task failed: {}", e)))?
        .inspect_err(|e| error!(error = %e, "Failed to store upload"))?;
    info!(filename = %stored_name, bytes = size, "Stored uploaded audio");

    Ok(HttpResponse::Ok().json(UploadResponse {
        filename: stored_name,
        content_type,
        size,
    }))
}

/// Write `data` to a new file in `dir`, returning the name it was stored under.
fn store_upload(dir: &Path, name: &str, data: &[u8]) -> io::Result<String> {
    std::fs::create_dir_all(dir)?;

    let mut candidate = name.to_string();
    loop {
        match OpenOptions::new().write(true).create_new(true).open(dir.join(&candidate)) {
            Ok(mut file) => {
                file.write_all(data)?;
                file.flush()?;
                return Ok(candidate);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                candidate = format!("{}_{}", uuid::Uuid::new_v4().simple(), name);
            }
            Err(err) => return Err(err),
        }
    }
}

/// File-name component of `client_name`, or a fresh uuid when there isn't a usable one.
fn storage_name(client_name: Option<&str>) -> String {
    client_name
        // Clients on Windows send backslash-separated paths
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or_default())
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload_{}", uuid::Uuid::new_v4()))
}
