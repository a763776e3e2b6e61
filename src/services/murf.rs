//! Murf speech synthesis adapter.
//!
//! Murf renders the audio on its side and answers with a short-lived URL
//! (`audioFile`), which is handed to the client unchanged.

use super::{ensure_success, ServiceError, ServiceResult, SpeechSynthesizer};
use crate::config::ServicesConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct MurfSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    style: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    audio_file: Option<String>,
}

impl MurfSynthesizer {
    pub fn new(client: reqwest::Client, config: &ServicesConfig) -> Self {
        Self {
            client,
            base_url: config.murf_base_url.trim_end_matches('/').to_string(),
            api_key: config.murf_api_key.clone(),
            voice_id: config.murf_voice_id.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MurfSynthesizer {
    async fn synthesize(&self, text: &str, style: &str) -> ServiceResult<String> {
        if self.api_key.is_empty() {
            return Err(ServiceError::NotConfigured("murf"));
        }

        debug!(voice = %self.voice_id, style = %style, text_chars = text.len(), "Synthesizing speech");

        let response = self
            .client
            .post(format!("{}/v1/speech/generate", self.base_url))
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&GenerateRequest {
                text,
                voice_id: &self.voice_id,
                style,
                format: "mp3",
            })
            .send()
            .await?;

        let body: GenerateResponse = ensure_success(response).await?.json().await?;
        body.audio_file
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ServiceError::Malformed("response had no audioFile".to_string()))
    }
}
