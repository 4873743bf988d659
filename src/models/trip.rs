use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::waypoint::Waypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "scheduled",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripEndpoint {
    pub label: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl TripEndpoint {
    pub fn at(waypoint: &Waypoint, label: Option<String>) -> Self {
        Self {
            label,
            latitude: waypoint.latitude,
            longitude: waypoint.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRecord {
    pub id: String,
    pub device_id: String,
    pub start_mileage: f64,
    pub end_mileage: f64,
    pub distance_km: f64,
    pub elapsed_time_sec: u64,
    pub average_speed_kmh: f64,
    pub start_location: TripEndpoint,
    pub end_location: TripEndpoint,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: TripStatus,
}

/// Odometer reading at the end of a trip, rounded to whole kilometres.
/// Never goes below the starting reading, even for a fractional start.
pub fn end_mileage(start_mileage: f64, distance_km: f64) -> f64 {
    (start_mileage + distance_km).round().max(start_mileage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_mileage_rounds_to_nearest_km() {
        assert_eq!(end_mileage(45000.0, 12.34), 45012.0);
        assert_eq!(end_mileage(45000.0, 12.5), 45013.0);
        assert_eq!(end_mileage(45000.0, 0.0), 45000.0);
        assert!(end_mileage(45000.4, 0.0) >= 45000.4);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TripStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(TripStatus::Completed.as_str(), "completed");
    }
}
