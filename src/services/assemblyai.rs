//! AssemblyAI speech-to-text adapter.
//!
//! ## Request flow:
//! 1. `POST /v2/upload` with the raw audio bytes → `upload_url`
//! 2. `POST /v2/transcript` with `{"audio_url": upload_url}` → transcript `id`
//! 3. `GET /v2/transcript/{id}` until `status` is `completed` or `error`
//!
//! The whole sequence counts as one adapter call, bounded by the orchestrator's
//! transcription deadline (`stt_timeout_secs`). The shorter per-request client
//! timeout still applies to each of the requests inside it.

use super::{ensure_success, ServiceError, ServiceResult, Transcriber};
use crate::config::ServicesConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub struct AssemblyAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

/// Transcript resource as returned by both the create and the status endpoint.
#[derive(Debug, Deserialize)]
struct Transcript {
    id: String,
    status: TranscriptStatus,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum TranscriptStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl AssemblyAiTranscriber {
    pub fn new(client: reqwest::Client, config: &ServicesConfig) -> Self {
        Self {
            client,
            base_url: config.assemblyai_base_url.trim_end_matches('/').to_string(),
            api_key: config.assemblyai_api_key.clone(),
            poll_interval: Duration::from_millis(config.stt_poll_interval_ms),
        }
    }

    async fn upload(&self, audio: &[u8]) -> ServiceResult<String> {
        let response = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await?;

        let upload: UploadResponse = ensure_success(response).await?.json().await?;
        Ok(upload.upload_url)
    }

    async fn create_transcript(&self, audio_url: &str) -> ServiceResult<Transcript> {
        let response = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&json!({ "audio_url": audio_url }))
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    async fn fetch_transcript(&self, id: &str) -> ServiceResult<Transcript> {
        let response = self
            .client
            .get(format!("{}/v2/transcript/{}", self.base_url, id))
            .header("authorization", &self.api_key)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> ServiceResult<String> {
        if self.api_key.is_empty() {
            return Err(ServiceError::NotConfigured("assemblyai"));
        }

        let upload_url = self.upload(audio).await?;
        let mut transcript = self.create_transcript(&upload_url).await?;
        debug!(transcript_id = %transcript.id, bytes = audio.len(), "Transcription queued");

        loop {
            match transcript.status {
                TranscriptStatus::Completed => {
                    let text = transcript.text.unwrap_or_default().trim().to_string();
                    return if text.is_empty() {
                        Err(ServiceError::EmptyTranscript)
                    } else {
                        Ok(text)
                    };
                }
                TranscriptStatus::Error => {
                    let reason = transcript.error.unwrap_or_else(|| "unknown error".to_string());
                    warn!(transcript_id = %transcript.id, reason = %reason, "Transcription failed");
                    return Err(ServiceError::Malformed(reason));
                }
                TranscriptStatus::Queued | TranscriptStatus::Processing => {
                    tokio::time::sleep(self.poll_interval).await;
                    transcript = self.fetch_transcript(&transcript.id).await?;
                }
            }
        }
    }
}
