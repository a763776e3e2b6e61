//! Google Gemini `generateContent` adapter.

use super::{ensure_success, LanguageModel, ServiceError, ServiceResult};
use crate::config::ServicesConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    pub fn new(client: reqwest::Client, config: &ServicesConfig) -> Self {
        Self {
            client,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            api_key: config.gemini_api_key.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate.
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn query(&self, prompt: &str) -> ServiceResult<String> {
        if self.api_key.is_empty() {
            return Err(ServiceError::NotConfigured("gemini"));
        }

        debug!(model = %self.model, prompt_chars = prompt.len(), "Querying language model");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()
            .await?;

        let body: GenerateContentResponse = ensure_success(response).await?.json().await?;
        body.into_text()
            .ok_or_else(|| ServiceError::Malformed("no candidate text in response".to_string()))
    }
}
