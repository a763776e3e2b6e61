//! # Voice Agent Backend - Main Application Entry Point
//!
//! Actix-web server for a conversational voice agent:
//!
//! - **Live capture**: browsers stream recorded audio over `/ws/audio`, and every
//!   chunk is persisted to its own file as it arrives
//! - **Conversation**: `/agent/chat/{session_id}` runs speech-to-text, the language
//!   model and speech synthesis for one spoken turn, remembering the dialogue
//! - **Single-shot helpers**: `/tts`, `/llm/query`, `/transcribe/file`, `/tts/echo`
//!   and `/upload-audio`
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config file, environment)
//! - **state**: Shared application state and metrics
//! - **websocket**: The streaming capture actor
//! - **audio**: The per-connection capture file
//! - **agent**: Conversation history, session store and turn orchestration
//! - **services**: HTTP adapters for the transcription, language and voice services
//! - **handlers**: HTTP request handlers and route table
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request metrics
//! - **error**: HTTP error responses

mod agent;       // Conversation history and turn orchestration (agent/ directory)
mod audio;       // Streaming capture files (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod services;    // Remote speech and language services (services/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // WebSocket audio streaming (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::from_fn, web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::services::ServiceAdapters;
use crate::state::AppState;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle conversation sessions are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Prepares the upload directory** and the remote service adapters
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGTERM / SIGINT
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-agent-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    std::fs::create_dir_all(&config.storage.upload_dir).with_context(|| {
        format!("Failed to create upload directory {}", config.storage.upload_dir.display())
    })?;
    info!(upload_dir = %config.storage.upload_dir.display(), "Audio uploads will be stored here");

    for (service, key) in [
        ("assemblyai", &config.services.assemblyai_api_key),
        ("gemini", &config.services.gemini_api_key),
        ("murf", &config.services.murf_api_key),
    ] {
        if key.is_empty() {
            warn!(service, "No API key configured; requests to it will use fallbacks");
        }
    }

    let services = ServiceAdapters::from_config(&config.services)?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, services);

    spawn_session_eviction(app_state.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            // Middleware executes in reverse order of registration for requests
            .wrap(from_fn(middleware::record_metrics))
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            // Open streams are closed, which runs their cleanup
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "debug", "voice_agent_backend=trace")
/// - If not set, defaults to "voice_agent_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_agent_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Periodically drop conversation sessions that have been idle past their TTL.
fn spawn_session_eviction(app_state: AppState) {
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = app_state.sessions.evict_expired().await;
            if evicted > 0 {
                info!(evicted, "Evicted idle conversation sessions");
            }
        }
    });
}

/// Resolve when SIGTERM or SIGINT (Ctrl+C) arrives.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
