//! # Conversational Voice Agent
//!
//! One user turn goes through speech-to-text, the language model and speech
//! synthesis, with every step allowed to fail independently.
//!
//! ## Components:
//! - **history**: turns and the `User:`/`Bot:` prompt format
//! - **session**: the in-memory store of per-session histories
//! - **orchestrator**: sequences the three service calls and applies fallbacks

pub mod history;       // Turn, Role and prompt rendering
pub mod session;       // SessionStore with per-session locking and eviction
pub mod orchestrator;  // TurnOrchestrator

use serde::{Deserialize, Serialize};

pub use orchestrator::TurnOrchestrator;
pub use session::SessionStore;

/// Text shown (and spoken) whenever a remote service lets us down.
pub const FALLBACK_REPLY: &str = "I'm having trouble connecting right now.";

/// Result of one conversational turn. Always well-formed, even when degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentChatResponse {
    /// What the user said, or `null` if nothing usable was heard
    pub user_transcript: Option<String>,
    /// The agent's reply, or the fallback phrase
    pub bot_text: String,
    /// Where the spoken reply can be fetched, or `null` if synthesis failed
    pub audio_url: Option<String>,
}

impl AgentChatResponse {
    /// Response for a turn where no speech could be recognized.
    pub fn unheard() -> Self {
        Self {
            user_transcript: None,
            bot_text: FALLBACK_REPLY.to_string(),
            audio_url: None,
        }
    }
}

/// Result of the single-shot synthesis endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsResponse {
    pub audio_url: Option<String>,
    pub bot_text: Option<String>,
}
