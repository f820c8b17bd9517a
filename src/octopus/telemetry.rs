//! Smart meter telemetry
//!
//! The live reading type and the decoding of `smartMeterTelemetry` points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OctopusError;

/// One live reading from the smart meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionReading {
    /// When the meter took the reading
    pub timestamp: DateTime<Utc>,
    /// Cumulative consumption in Wh
    pub total_consumption: i64,
    /// Instantaneous demand in W
    pub demand: i64,
}

/// A raw telemetry point as returned by the API
///
/// Consumption and demand arrive as decimal strings that are always whole
/// numbers in practice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPoint {
    pub read_at: DateTime<Utc>,
    pub consumption: String,
    pub demand: String,
}

fn parse_whole(field: &str, raw: &str) -> Result<i64, OctopusError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| OctopusError::Decode(format!("live consumption {} {:?}: {}", field, raw, e)))?;

    if !value.is_finite() {
        return Err(OctopusError::Decode(format!(
            "live consumption {} {:?}: not a finite number",
            field, raw
        )));
    }

    Ok(value as i64)
}

/// Turn the newest telemetry point into a reading
pub fn latest_reading(points: &[TelemetryPoint]) -> Result<ConsumptionReading, OctopusError> {
    let latest = points
        .last()
        .ok_or_else(|| OctopusError::NoData("No electricity meter readings found".into()))?;

    Ok(ConsumptionReading {
        timestamp: latest.read_at,
        total_consumption: parse_whole("consumption", &latest.consumption)?,
        demand: parse_whole("demand", &latest.demand)?,
    })
}
