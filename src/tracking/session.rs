use chrono::{DateTime, Utc};

use crate::models::trip::{end_mileage, TripEndpoint, TripRecord, TripStatus};
use crate::models::waypoint::{PositionSample, RouteSnapshot, Waypoint};
use crate::tracking::metrics::{average_speed_kmh, MetricsReducer, TripMetrics};
use crate::tracking::route::RouteAccumulator;

/// In-memory state of a trip being tracked.
#[derive(Debug, Clone)]
pub struct TripSession {
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub start_mileage: f64,
    pub start_label: Option<String>,
    route: RouteAccumulator,
    metrics: MetricsReducer,
}

impl TripSession {
    pub fn begin(
        device_id: &str,
        start_time: DateTime<Utc>,
        start_mileage: f64,
        start_label: Option<String>,
        first_fix: &PositionSample,
    ) -> Self {
        let mut session = Self {
            device_id: device_id.to_string(),
            start_time,
            start_mileage,
            start_label,
            route: RouteAccumulator::new(),
            metrics: MetricsReducer::new(),
        };
        session.record(first_fix);
        session
    }

    pub fn record(&mut self, sample: &PositionSample) -> TripMetrics {
        let distance = self.route.append(sample);
        self.metrics.set_distance(distance);
        self.metrics.observe_speed(sample.speed_mps);
        self.metrics.snapshot()
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> TripMetrics {
        self.metrics.set_elapsed(elapsed_secs(self.start_time, now));
        self.metrics.snapshot()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        self.route.waypoints()
    }

    pub fn metrics(&self) -> TripMetrics {
        self.metrics.snapshot()
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            waypoints: self.route.waypoints().to_vec(),
            current_position: self.route.last().copied(),
            start_position: self.route.first().copied(),
        }
    }

    /// Closes the session into a final record with the given status.
    pub fn finish(
        self,
        id: String,
        end_time: DateTime<Utc>,
        end_label: Option<String>,
        status: TripStatus,
    ) -> TripRecord {
        let distance_km = self.route.distance_km();
        let elapsed_time_sec = elapsed_secs(self.start_time, end_time);
        // begin() always records a first fix, so the route is never empty
        let first = self.route.first().copied().unwrap_or(Waypoint {
            latitude: 0.0,
            longitude: 0.0,
            timestamp: self.start_time,
        });
        let last = self.route.last().copied().unwrap_or(first);

        TripRecord {
            id,
            device_id: self.device_id,
            start_mileage: self.start_mileage,
            end_mileage: end_mileage(self.start_mileage, distance_km),
            distance_km,
            elapsed_time_sec,
            average_speed_kmh: average_speed_kmh(distance_km, elapsed_time_sec),
            start_location: TripEndpoint::at(&first, self.start_label),
            end_location: TripEndpoint::at(&last, end_label),
            start_time: self.start_time,
            end_time,
            status,
        }
    }
}

fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - start).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_one_minute_trip_across_lusaka() {
        let start = PositionSample::new(-15.3875, 28.3228, t0());
        let mut session = TripSession::begin("truck-7", t0(), 45000.0, Some("Depot".into()), &start);
        session.record(&PositionSample::new(-15.3900, 28.3250, t0() + Duration::seconds(60)).with_speed(6.0));

        let metrics = session.tick(t0() + Duration::seconds(60));
        assert_eq!(metrics.elapsed_secs, 60);
        assert_eq!(metrics.elapsed_display, "01:00");
        assert_eq!(metrics.current_speed_kmh, 22.0);

        let record = session.finish(
            "trip-1".into(),
            t0() + Duration::seconds(60),
            None,
            TripStatus::Completed,
        );
        assert!((record.distance_km - 0.3646).abs() < 0.001);
        assert!((record.average_speed_kmh - 21.88).abs() < 0.1);
        assert_eq!(record.elapsed_time_sec, 60);
        assert_eq!(record.end_mileage, 45000.0);
        assert_eq!(record.status, TripStatus::Completed);
        assert_eq!(record.start_location.label.as_deref(), Some("Depot"));
        assert_eq!(record.end_location.latitude, -15.39);
    }

    #[test]
    fn test_finish_without_extra_samples() {
        let start = PositionSample::new(-15.3875, 28.3228, t0());
        let session = TripSession::begin("truck-7", t0(), 45000.0, None, &start);
        let record = session.finish("trip-2".into(), t0(), Some("Depot".into()), TripStatus::Cancelled);

        assert_eq!(record.distance_km, 0.0);
        assert_eq!(record.elapsed_time_sec, 0);
        assert_eq!(record.average_speed_kmh, 0.0);
        assert_eq!(record.end_mileage, 45000.0);
        assert_eq!(record.status, TripStatus::Cancelled);
        assert_eq!(record.start_location, TripEndpoint { label: None, latitude: -15.3875, longitude: 28.3228 });
    }

    #[test]
    fn test_snapshot_is_a_detached_copy() {
        let start = PositionSample::new(-15.3875, 28.3228, t0());
        let mut session = TripSession::begin("truck-7", t0(), 0.0, None, &start);
        let before = session.snapshot();
        session.record(&PositionSample::new(-15.39, 28.325, t0() + Duration::seconds(5)));

        assert_eq!(before.waypoints.len(), 1);
        assert_eq!(before.start_position, before.current_position);
        let after = session.snapshot();
        assert_eq!(after.waypoints.len(), 2);
        assert_eq!(after.current_position.unwrap().latitude, -15.39);
    }

    #[test]
    fn test_clock_going_backwards_never_underflows() {
        let start = PositionSample::new(0.0, 0.0, t0());
        let mut session = TripSession::begin("truck-7", t0(), 0.0, None, &start);
        assert_eq!(session.tick(t0() - Duration::seconds(3)).elapsed_secs, 0);
    }
}
