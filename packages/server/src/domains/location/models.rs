use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Coordinate, DispatchError, DispatchResult, HelperId, TaskId};

/// A raw position sample as reported by a helper's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    /// Device clock; the server clock is used when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationInput {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            heading: None,
            speed_kmh: None,
            timestamp: None,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        self.coordinate().validate()?;
        if let Some(accuracy) = self.accuracy_m {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(DispatchError::Validation(
                    "accuracy must be non-negative".to_string(),
                ));
            }
        }
        if let Some(heading) = self.heading {
            if !(0.0..360.0).contains(&heading) {
                return Err(DispatchError::Validation(
                    "heading must be within [0, 360)".to_string(),
                ));
            }
        }
        if let Some(speed) = self.speed_kmh {
            if !speed.is_finite() || speed < 0.0 {
                return Err(DispatchError::Validation(
                    "speed must be non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The broadcast form of one sample. When `obfuscated`, the coordinate is a
/// cell center, `accuracy_m` is the cell's radius and heading/speed are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub helper_id: HelperId,
    pub task_id: TaskId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub obfuscated: bool,
    pub distance_to_destination_km: Option<f64>,
}

/// Result of running a sample through the policy.
#[derive(Debug, Clone)]
pub struct ProcessedLocation {
    pub update: LocationUpdate,
    /// The unmodified position, for internal persistence only.
    pub exact: Coordinate,
    /// First sample inside the arrival radius since the cool-down expired.
    pub arriving: bool,
}

/// Result of `ingest_location`. Throttling is advisory, not an error.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Accepted(LocationUpdate),
    Throttled { retry_after_ms: u64 },
}

/// A helper near some point, from the short-lived sample cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyHelper {
    pub helper_id: HelperId,
    pub task_id: TaskId,
    pub distance_km: f64,
    pub reported_at: DateTime<Utc>,
}
