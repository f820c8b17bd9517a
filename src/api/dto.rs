//! Request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::octopus::ConsumptionReading;
use crate::poller::PollStatus;

/// Largest page the readings endpoint will return
pub const MAX_READINGS_LIMIT: usize = 10_000;

/// Query parameters for GET /api/v1/readings
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    /// Only readings at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Newest N readings
    pub limit: Option<usize>,
}

/// Response for GET /api/v1/readings
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub readings: Vec<ConsumptionReading>,
    pub count: usize,
}

/// Response for GET /health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, unhealthy
    pub status: String,
    /// Whether the broadcast hub loop is running
    pub hub_running: bool,
    /// Active live feed subscribers
    pub subscribers: usize,
    /// Store status: ok, error, disabled
    pub storage: String,
    /// Poller summary, when a poller is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poller: Option<PollStatus>,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
