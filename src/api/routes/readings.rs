//! Reading Routes
//!
//! - GET /api/v1/readings - Stored readings, oldest first

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{ReadingsQuery, ReadingsResponse, MAX_READINGS_LIMIT};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/readings?since=<RFC3339>&limit=<n>
pub async fn list_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadingsQuery>,
) -> ApiResult<Json<ReadingsResponse>> {
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Reading store is disabled".into()))?;

    if let Some(limit) = params.limit {
        if limit == 0 || limit > MAX_READINGS_LIMIT {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_READINGS_LIMIT
            )));
        }
    }

    let readings = store.readings(params.since, params.limit)?;

    Ok(Json(ReadingsResponse {
        count: readings.len(),
        readings,
    }))
}
