//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request
//! handlers and WebSocket actors simultaneously.
//!
//! ## What is shared:
//! - **config**: read-only after startup, so a plain `Arc<AppConfig>`
//! - **sessions**: the conversation store (its own async locking lives inside it)
//! - **orchestrator**: stateless apart from the store and adapters it holds
//! - **metrics**: request counters and streaming statistics, behind `Arc<RwLock<T>>`
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many HTTP handlers can hold a reference)
//! - **RwLock**: Thread-safe read/write access
//! - **T**: The actual data type being protected

use crate::agent::{SessionStore, TurnOrchestrator};
use crate::config::AppConfig;
use crate::services::ServiceAdapters;
use std::collections::HashMap;       // For storing per-endpoint metrics
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};  // For tracking server uptime

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Per-session conversation histories
    pub sessions: Arc<SessionStore>,

    /// Runs conversational and single-shot speech turns
    pub orchestrator: Arc<TurnOrchestrator>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests and streaming connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// `/ws/audio` connections currently open
    pub active_streams: u32,

    /// `/ws/audio` connections accepted since server start
    pub total_streams: u64,

    /// Audio bytes persisted by all streaming connections
    pub streamed_bytes: u64,

    /// Detailed metrics for each API endpoint
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState, wiring the session store and orchestrator together.
    pub fn new(config: AppConfig, services: ServiceAdapters) -> Self {
        let sessions = Arc::new(SessionStore::new(
            config.sessions.max_sessions,
            Duration::from_secs(config.sessions.idle_ttl_secs),
        ));
        let orchestrator = Arc::new(TurnOrchestrator::new(services, sessions.clone(), &config));

        Self {
            config: Arc::new(config),
            sessions,
            orchestrator,
            // Start with empty metrics
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            // Record when the server started
            start_time: Instant::now(),
        }
    }

    /// Run `update` with exclusive access to the metrics. A poisoned lock is recovered.
    fn with_metrics<R>(&self, update: impl FnOnce(&mut AppMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics)
    }

    /// Count one HTTP request, recording its endpoint, duration and outcome.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|metrics| {
            metrics.request_count += 1;
            if is_error {
                metrics.error_count += 1;
            }

            // Get or create metrics for this specific endpoint
            let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// A streaming connection was accepted.
    pub fn stream_opened(&self) {
        self.with_metrics(|metrics| {
            metrics.active_streams += 1;
            metrics.total_streams += 1;
        });
    }

    /// A streaming connection finished, having persisted `bytes` bytes.
    ///
    /// ## Safety check:
    /// Uses `saturating_sub` so an unbalanced call can't underflow the counter.
    pub fn stream_closed(&self, bytes: u64) {
        self.with_metrics(|metrics| {
            metrics.active_streams = metrics.active_streams.saturating_sub(1);
            metrics.streamed_bytes += bytes;
        });
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// The lock is released before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint, 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let config = AppConfig::default();
        let services = ServiceAdapters::from_config(&config.services).unwrap();
        AppState::new(config, services)
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);

        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_stream_counters_never_underflow() {
        let state = state();
        state.stream_opened();
        state.stream_closed(128);
        state.stream_closed(0);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_streams, 0);
        assert_eq!(metrics.total_streams, 1);
        assert_eq!(metrics.streamed_bytes, 128);
    }
}
