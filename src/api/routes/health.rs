//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (hub is running)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 once the broadcast hub is accepting subscribers.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.hub.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
///
/// Full health status with component details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hub_running = state.hub.is_running();

    let storage = match &state.store {
        None => "disabled",
        Some(store) => match store.count() {
            Ok(_) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                "error"
            }
        },
    };

    let poller = state.poll_status().await;
    let poller_failing = poller
        .as_ref()
        .map(|p| p.consecutive_failures > 0)
        .unwrap_or(false);

    let status = if !hub_running {
        "unhealthy"
    } else if storage == "error" || poller_failing {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        hub_running,
        subscribers: state.hub.subscriber_count(),
        storage: storage.to_string(),
        poller,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
