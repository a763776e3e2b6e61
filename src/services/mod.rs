//! # Speech and Language Service Adapters
//!
//! Each remote capability the agent needs sits behind one small async trait:
//! - **Transcriber**: audio bytes → text (AssemblyAI)
//! - **LanguageModel**: prompt → reply text (Gemini)
//! - **SpeechSynthesizer**: text + voice style → URL of the rendered audio (Murf)
//!
//! Adapters report failures as a typed [`ServiceError`]. They never invent fallback
//! text themselves; deciding what the caller sees is the orchestrator's job.

pub mod assemblyai;  // Speech-to-text
pub mod gemini;      // Language model
pub mod murf;        // Speech synthesis

use crate::config::ServicesConfig;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use assemblyai::AssemblyAiTranscriber;
pub use gemini::GeminiModel;
pub use murf::MurfSynthesizer;

/// Why a remote call produced no usable result.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No API key was configured for this service
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Connection, TLS or body transfer failure
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered 2xx but the payload lacked the expected fields
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The call did not finish within the configured deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transcription finished but contained no speech
    #[error("transcript was empty")]
    EmptyTranscript,
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Malformed(err.to_string())
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> ServiceResult<String>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn query(&self, prompt: &str) -> ServiceResult<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns a URL the client can fetch the rendered audio from.
    async fn synthesize(&self, text: &str, style: &str) -> ServiceResult<String>;
}

/// The three adapters the orchestrator drives, bundled for construction.
#[derive(Clone)]
pub struct ServiceAdapters {
    pub transcriber: Arc<dyn Transcriber>,
    pub language_model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl ServiceAdapters {
    /// Build the HTTP-backed adapters, sharing one connection pool.
    pub fn from_config(config: &ServicesConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("voice-agent-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            transcriber: Arc::new(AssemblyAiTranscriber::new(client.clone(), config)),
            language_model: Arc::new(GeminiModel::new(client.clone(), config)),
            synthesizer: Arc::new(MurfSynthesizer::new(client, config)),
        })
    }
}

/// Run one adapter call, converting an overrun into [`ServiceError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(deadline)),
    }
}

/// Turn a non-success response into [`ServiceError::Status`], keeping a short body excerpt.
pub(crate) async fn ensure_success(response: reqwest::Response) -> ServiceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: String = response.text().await.unwrap_or_default().chars().take(512).collect();
    Err(ServiceError::Status { status: status.as_u16(), body })
}
