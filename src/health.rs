//! # Health and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/v1/health` - liveness plus a summary of load
//! - `GET /api/v1/metrics` - per-endpoint request statistics

use crate::config::{AppConfig, ServicesConfig};
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let uptime_seconds = state.get_uptime_seconds();
    let session_count = state.sessions.session_count().await;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-agent-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_streams": metrics.active_streams,
            "total_streams": metrics.total_streams,
            "streamed_bytes": metrics.streamed_bytes
        },
        "memory": get_memory_info(),
        "services": service_status(&config.services),
        "system": get_system_status(config, session_count)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let session_count = state.sessions.session_count().await;

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "streams": {
            "active": metrics.active_streams,
            "total": metrics.total_streams,
            "bytes": metrics.streamed_bytes
        },
        "sessions": {
            "count": session_count,
            "max_sessions": state.config.sessions.max_sessions,
            "idle_ttl_secs": state.config.sessions.idle_ttl_secs
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

/// Which remote services have credentials. Keys themselves are never reported.
fn service_status(services: &ServicesConfig) -> serde_json::Value {
    json!({
        "transcription": {
            "provider": "assemblyai",
            "configured": !services.assemblyai_api_key.is_empty()
        },
        "language_model": {
            "provider": "gemini",
            "model": services.gemini_model,
            "configured": !services.gemini_api_key.is_empty()
        },
        "speech_synthesis": {
            "provider": "murf",
            "voice_id": services.murf_voice_id,
            "configured": !services.murf_api_key.is_empty()
        }
    })
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, session_count: usize) -> serde_json::Value {
    let session_usage = if config.sessions.max_sessions > 0 {
        session_count as f64 / config.sessions.max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.sessions.max_sessions,
        "current_sessions": session_count,
        "load_warnings": if session_usage > 0.8 {
            vec!["Conversation store nearly full - least recently used sessions will be evicted"]
        } else {
            vec![]
        }
    })
}
