//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known environment variables (HOST, PORT, ASSEMBLYAI_API_KEY, GEMINI_API_KEY, MURF_API_KEY)
//! 2. Environment variables with the APP_ prefix (APP_SERVER__PORT, APP_SESSIONS__MAX_SESSIONS, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one part of the service: the HTTP listener, where audio lands
/// on disk, how streaming connections behave, the remote speech/language services,
/// the conversation store, and the agent's fixed phrasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub stream: StreamConfig,
    pub services: ServicesConfig,
    pub sessions: SessionsConfig,
    pub agent: AgentConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Where captured and uploaded audio is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for `stream_*` capture files and `/upload-audio` files
    pub upload_dir: PathBuf,
    /// File extension used for streamed captures (the codec is not inspected)
    pub stream_extension: String,
}

/// Behaviour of `/ws/audio` connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Largest single WebSocket frame accepted, in bytes
    pub max_frame_bytes: usize,
    /// A connection that sends nothing for this long is treated as disconnected
    pub idle_timeout_secs: u64,
    /// Call `sync_data` after every chunk, not just `flush`
    pub fsync_each_chunk: bool,
    /// Largest capture file one connection may write; crossing it closes the connection
    pub max_capture_bytes: u64,
}

/// Remote speech-to-text, language model and speech synthesis endpoints.
///
/// ## Credentials:
/// API keys default to empty strings. An adapter with an empty key reports
/// "not configured" instead of making a network call, which the orchestrator
/// turns into the usual fallback reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub assemblyai_api_key: String,
    pub assemblyai_base_url: String,
    /// Delay between transcript status polls
    pub stt_poll_interval_ms: u64,

    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,

    pub murf_api_key: String,
    pub murf_base_url: String,
    pub murf_voice_id: String,

    /// Deadline for a language model or synthesis call, and for each HTTP request
    pub request_timeout_secs: u64,
    /// Deadline for a whole transcription: upload, job creation and every status poll
    pub stt_timeout_secs: u64,
}

/// Limits for the in-memory conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Once this many sessions exist the least recently used one is evicted
    pub max_sessions: usize,
    /// Sessions idle for longer than this are evicted
    pub idle_ttl_secs: u64,
    /// Number of most recent turns rendered into the prompt (0 = all of them)
    pub max_prompt_turns: usize,
}

/// Fixed phrasing used by the conversational agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Voice style passed to the synthesizer for multi-turn chat replies
    pub chat_style: String,
    /// Style used by the single-shot `/tts` and `/tts/echo` endpoints
    pub default_style: String,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
                stream_extension: "webm".to_string(),  // MediaRecorder default in browsers
            },
            stream: StreamConfig {
                max_frame_bytes: 1024 * 1024,  // 1 MiB
                idle_timeout_secs: 60,
                fsync_each_chunk: true,
                max_capture_bytes: 512 * 1024 * 1024,  // 512 MiB
            },
            services: ServicesConfig {
                assemblyai_api_key: String::new(),
                assemblyai_base_url: "https://api.assemblyai.com".to_string(),
                stt_poll_interval_ms: 500,
                gemini_api_key: String::new(),
                gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
                gemini_model: "gemini-1.5-flash".to_string(),
                murf_api_key: String::new(),
                murf_base_url: "https://api.murf.ai".to_string(),
                murf_voice_id: "en-US-natalie".to_string(),
                request_timeout_secs: 8,
                stt_timeout_secs: 30,
            },
            sessions: SessionsConfig {
                max_sessions: 1000,
                idle_ttl_secs: 3600,
                max_prompt_turns: 20,
            },
            agent: AgentConfig {
                chat_style: "Conversational".to_string(),
                default_style: "Conversational".to_string(),
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and the service API keys
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_SESSIONS__MAX_PROMPT_TURNS=40`: Render more history into each prompt
    /// - `GEMINI_API_KEY=...`: Same name the hosted services document
    ///
    /// The double underscore separates nesting levels so that field names which
    /// themselves contain underscores (`max_prompt_turns`) survive intact.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        for (var, key) in [
            ("ASSEMBLYAI_API_KEY", "services.assemblyai_api_key"),
            ("GEMINI_API_KEY", "services.gemini_api_key"),
            ("MURF_API_KEY", "services.murf_api_key"),
        ] {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.upload_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        if self.storage.stream_extension.is_empty()
            || !self.storage.stream_extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(anyhow::anyhow!(
                "Stream extension must be non-empty and alphanumeric, got '{}'",
                self.storage.stream_extension
            ));
        }

        if self.stream.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        if self.stream.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Stream idle timeout must be greater than 0"));
        }

        if self.stream.max_capture_bytes == 0 {
            return Err(anyhow::anyhow!("Max capture size must be greater than 0"));
        }

        if self.services.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Service request timeout must be greater than 0"));
        }

        if self.services.stt_timeout_secs < self.services.request_timeout_secs {
            return Err(anyhow::anyhow!(
                "Transcription timeout ({}s) must be at least the request timeout ({}s)",
                self.services.stt_timeout_secs,
                self.services.request_timeout_secs
            ));
        }

        if self.sessions.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max sessions must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Deadline for a single language model or synthesis call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.services.request_timeout_secs)
    }

    /// Deadline for one complete transcription, polling included.
    pub fn stt_timeout(&self) -> Duration {
        Duration::from_secs(self.services.stt_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.stream_extension, "webm");
        assert_eq!(config.agent.chat_style, "Conversational");
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;  // Invalid port
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.stream_extension = "../webm".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.services.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sessions.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.max_capture_bytes = 0;
        assert!(config.validate().is_err());

        // A transcription is several requests, so its deadline can't be shorter than one
        let mut config = AppConfig::default();
        config.services.stt_timeout_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_round_trip_through_config_builder() {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .set_override("sessions.max_prompt_turns", 4)
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.sessions.max_prompt_turns, 4);
        assert_eq!(config.services.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.stt_timeout(), Duration::from_secs(30));
    }
}
