use serde::{Deserialize, Serialize};

use crate::common::error::{DispatchError, DispatchResult};

/// Mean Earth radius used for great-circle math.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject NaN and out-of-range values before they reach the spatial index.
    pub fn validate(&self) -> DispatchResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DispatchError::Validation(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(DispatchError::Validation(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }

    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        calculate_distance_km(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// Calculate distance between two coordinates in kilometers
///
/// Uses the Haversine formula. Display and ETA only: candidate inclusion is
/// gated by the spatial index, never by this value.
pub fn calculate_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Minutes to cover `distance_km` at `speed_kmh`, rounded up.
pub fn estimate_eta_minutes(distance_km: f64, speed_kmh: f64) -> u32 {
    if distance_km <= 0.0 || speed_kmh <= 0.0 {
        return 0;
    }
    (distance_km / speed_kmh * 60.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_distance() {
        // Minneapolis to St. Paul (≈14.5 km)
        let distance = calculate_distance_km(44.98, -93.27, 44.95, -93.09);
        assert!(distance > 14.0 && distance < 15.0);

        let distance = calculate_distance_km(17.45, 78.391, 17.45, 78.391);
        assert!(distance < 1e-9);
    }

    #[test]
    fn test_eta_at_reference_speed() {
        assert_eq!(estimate_eta_minutes(5.0, 20.0), 15);
        assert_eq!(estimate_eta_minutes(0.0, 20.0), 0);
        assert_eq!(estimate_eta_minutes(0.1, 20.0), 1);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(Coordinate::new(17.45, 78.391).validate().is_ok());
        assert!(Coordinate::new(91.0, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.5).validate().is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
    }
}
