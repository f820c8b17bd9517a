//! Octowatch HTTP API
//!
//! HTTP and websocket layer, built with Axum.
//!
//! # Endpoints
//!
//! ## Readings
//! - `GET /api/v1/readings` - Stored readings (`since`, `limit`)
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws` - Live reading feed
//!
//! # Example
//!
//! ```rust,ignore
//! use octowatch::api::{build_router, serve, shutdown_signal, ApiConfig, AppState};
//! use octowatch::broadcast::Broadcaster;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(Broadcaster::new());
//!     hub.start()?;
//!
//!     let config = ApiConfig::default();
//!     let state = AppState::new(hub, config.clone());
//!     serve(state, &config, shutdown_signal()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/readings", get(routes::readings::list_readings));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .route("/ws", get(routes::live::live_feed))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server, running until `shutdown` resolves
pub async fn serve<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Octowatch API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Octowatch API shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::ReadingsResponse;
    use crate::broadcast::Broadcaster;
    use crate::octopus::ConsumptionReading;
    use crate::store::ReadingStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{DateTime, Utc};
    use tower::util::ServiceExt;

    fn reading(secs: i64, demand: i64) -> ConsumptionReading {
        ConsumptionReading {
            timestamp: DateTime::<Utc>::from_timestamp(1_790_000_000 + secs, 0).unwrap(),
            total_consumption: 5000 + secs,
            demand,
        }
    }

    fn create_test_app(started: bool, with_store: bool) -> (Router, Arc<Broadcaster<ConsumptionReading>>) {
        let hub = Arc::new(Broadcaster::new());
        if started {
            hub.start().unwrap();
        }

        let mut state = AppState::new(Arc::clone(&hub), ApiConfig::default());
        if with_store {
            let store = ReadingStore::open_in_memory().unwrap();
            store
                .insert_readings(&[reading(0, 100), reading(10, 200), reading(20, 300)])
                .unwrap();
            state = state.with_store(Arc::new(store));
        }

        (build_router(state), hub)
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _hub) = create_test_app(false, false);
        let response = get(app, "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_follows_hub() {
        let (app, hub) = create_test_app(true, false);
        let response = get(app, "/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
        hub.stop();

        let (app, _hub) = create_test_app(false, false);
        let response = get(app, "/health/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, hub) = create_test_app(true, true);
        let response = get(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["hub_running"], true);
        assert_eq!(body["storage"], "ok");
        assert_eq!(body["subscribers"], 0);
        hub.stop();
    }

    #[tokio::test]
    async fn test_list_readings() {
        let (app, _hub) = create_test_app(false, true);
        let response = get(app, "/api/v1/readings?limit=2").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: ReadingsResponse = body_json(response).await;
        assert_eq!(body.count, 2);
        assert_eq!(body.readings[0].demand, 200);
        assert_eq!(body.readings[1].demand, 300);
    }

    #[tokio::test]
    async fn test_list_readings_since() {
        let (app, _hub) = create_test_app(false, true);
        let since = reading(10, 0).timestamp.format("%Y-%m-%dT%H:%M:%SZ");
        let response = get(app, &format!("/api/v1/readings?since={}", since)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: ReadingsResponse = body_json(response).await;
        assert_eq!(body.count, 2);
    }

    #[tokio::test]
    async fn test_list_readings_bad_limit() {
        let (app, _hub) = create_test_app(false, true);
        let response = get(app, "/api/v1/readings?limit=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_readings_store_disabled() {
        let (app, _hub) = create_test_app(false, false);
        let response = get(app, "/api/v1/readings").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
