use crate::models::waypoint::{PositionSample, Waypoint};
use crate::tracking::distance::haversine_km;

/// Ordered waypoint history of one trip plus its running distance.
///
/// Samples are appended exactly as they arrive: no deduplication, no
/// smoothing, no reordering by timestamp. GPS jitter and out-of-order
/// fixes therefore count toward the distance.
#[derive(Debug, Default, Clone)]
pub struct RouteAccumulator {
    waypoints: Vec<Waypoint>,
    distance_km: f64,
}

impl RouteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the sample and returns the updated total distance in km.
    pub fn append(&mut self, sample: &PositionSample) -> f64 {
        let waypoint = Waypoint::from(sample);
        if let Some(last) = self.waypoints.last() {
            self.distance_km += haversine_km(last, &waypoint);
        }
        self.waypoints.push(waypoint);
        self.distance_km
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn first(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::distance::total_distance_km;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_keeps_arrival_order_even_when_timestamps_go_backwards() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut route = RouteAccumulator::new();
        route.append(&PositionSample::new(-15.3875, 28.3228, t0));
        route.append(&PositionSample::new(-15.3900, 28.3250, t0 + Duration::seconds(10)));
        route.append(&PositionSample::new(-15.3880, 28.3230, t0 + Duration::seconds(5)));

        let stamps: Vec<_> = route.waypoints().iter().map(|w| w.timestamp).collect();
        assert_eq!(
            stamps,
            vec![t0, t0 + Duration::seconds(10), t0 + Duration::seconds(5)]
        );
        assert_eq!(route.first().unwrap().latitude, -15.3875);
        assert_eq!(route.last().unwrap().latitude, -15.3880);
    }

    #[test]
    fn test_running_sum_matches_full_recompute() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut route = RouteAccumulator::new();
        assert_eq!(route.distance_km(), 0.0);

        for i in 0..25 {
            let step = i as f64 * 0.001;
            route.append(&PositionSample::new(
                -15.38 - step,
                28.32 + step * 0.7,
                t0 + Duration::seconds(i * 5),
            ));
        }

        assert_eq!(route.waypoints().len(), 25);
        assert!((route.distance_km() - total_distance_km(route.waypoints())).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_samples_are_kept() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let sample = PositionSample::new(-15.3875, 28.3228, t0);
        let mut route = RouteAccumulator::new();
        route.append(&sample);
        let d = route.append(&sample);
        assert_eq!(route.waypoints().len(), 2);
        assert_eq!(d, 0.0);
    }
}
