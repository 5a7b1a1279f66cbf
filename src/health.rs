//! # Health & Metrics Endpoints
//!
//! JSON status endpoints for deployment probes and dashboards. `/health`
//! answers cheaply for load balancers; `/api/v1/metrics` adds per-endpoint
//! request statistics.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "interview-agent-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions
        },
        "llm": {
            "model": config.llm.model,
            "base_url": config.llm.base_url
        },
        "call_context": {
            "entries": state.call_context().len(),
            "ttl_seconds": config.context.ttl_seconds
        },
        "recorder": {
            "enabled": config.recorder.is_enabled()
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();

    let endpoints: serde_json::Map<String, serde_json::Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            (
                endpoint.clone(),
                json!({
                    "request_count": metric.request_count,
                    "average_duration_ms": metric.average_duration_ms(),
                    "error_count": metric.error_count,
                    "error_rate": metric.error_rate()
                }),
            )
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "totals": {
            "requests": metrics.request_count,
            "errors": metrics.error_count,
            "active_sessions": metrics.active_sessions
        },
        "endpoints": endpoints
    }))
}
