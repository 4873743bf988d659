use chrono::{DateTime, Utc};
use serde::Serialize;

/// A position fix as emitted by a geolocation source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: Option<f64>, // m/s, None when the device didn't report it
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps: None,
            accuracy_m: None,
            timestamp,
        }
    }

    #[cfg(test)]
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }
}

/// One recorded point of a trip. Never mutated after it is appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&PositionSample> for Waypoint {
    fn from(sample: &PositionSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
        }
    }
}

/// Read-only copy of a session's route handed to the map renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSnapshot {
    pub waypoints: Vec<Waypoint>,
    pub current_position: Option<Waypoint>,
    pub start_position: Option<Waypoint>,
}
