use serde::Serialize;

/// Formats elapsed seconds as `MM:SS`, or `H:MM:SS` once past the hour.
pub fn format_elapsed(elapsed_secs: u64) -> String {
    let hours = elapsed_secs / 3600;
    let minutes = (elapsed_secs % 3600) / 60;
    let seconds = elapsed_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

pub fn average_speed_kmh(distance_km: f64, elapsed_secs: u64) -> f64 {
    if elapsed_secs == 0 {
        return 0.0;
    }
    distance_km / (elapsed_secs as f64 / 3600.0)
}

/// m/s as reported by the source, to whole km/h.
pub fn speed_kmh_from_mps(speed_mps: f64) -> f64 {
    (speed_mps * 3.6).round()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripMetrics {
    pub distance_km: f64,
    pub elapsed_secs: u64,
    pub elapsed_display: String,
    pub average_speed_kmh: f64,
    pub current_speed_kmh: f64,
}

/// Derived trip figures. Every output is a pure function of the latest
/// distance, elapsed time and speed sample, so ticks and position updates
/// may interleave in any order.
#[derive(Debug, Default, Clone)]
pub struct MetricsReducer {
    distance_km: f64,
    elapsed_secs: u64,
    current_speed_kmh: f64,
}

impl MetricsReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_distance(&mut self, distance_km: f64) {
        self.distance_km = distance_km;
    }

    pub fn set_elapsed(&mut self, elapsed_secs: u64) {
        self.elapsed_secs = elapsed_secs;
    }

    /// A sample without speed keeps the last known value.
    pub fn observe_speed(&mut self, speed_mps: Option<f64>) -> f64 {
        if let Some(mps) = speed_mps.filter(|s| s.is_finite() && *s >= 0.0) {
            self.current_speed_kmh = speed_kmh_from_mps(mps);
        }
        self.current_speed_kmh
    }

    pub fn snapshot(&self) -> TripMetrics {
        TripMetrics {
            distance_km: self.distance_km,
            elapsed_secs: self.elapsed_secs,
            elapsed_display: format_elapsed(self.elapsed_secs),
            average_speed_kmh: average_speed_kmh(self.distance_km, self.elapsed_secs),
            current_speed_kmh: self.current_speed_kmh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_formats() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3599), "59:59");
        assert_eq!(format_elapsed(3600), "1:00:00");
        assert_eq!(format_elapsed(3 * 3600 + 7 * 60 + 9), "3:07:09");
    }

    #[test]
    fn test_average_speed_is_zero_without_elapsed_time() {
        assert_eq!(average_speed_kmh(0.0, 0), 0.0);
        assert_eq!(average_speed_kmh(12.34, 0), 0.0);
    }

    #[test]
    fn test_average_speed_over_a_minute() {
        // 0.3646 km in 60 s
        let avg = average_speed_kmh(0.3646, 60);
        assert!((avg - 21.876).abs() < 0.01, "got {avg}");
        assert_eq!(average_speed_kmh(90.0, 3600), 90.0);
    }

    #[test]
    fn test_speed_converts_and_rounds() {
        assert_eq!(speed_kmh_from_mps(10.0), 36.0);
        assert_eq!(speed_kmh_from_mps(13.9), 50.0);
        assert_eq!(speed_kmh_from_mps(0.0), 0.0);
    }

    #[test]
    fn test_missing_speed_retains_last_value() {
        let mut reducer = MetricsReducer::new();
        assert_eq!(reducer.observe_speed(None), 0.0);
        assert_eq!(reducer.observe_speed(Some(25.0)), 90.0);
        assert_eq!(reducer.observe_speed(None), 90.0);
        assert_eq!(reducer.observe_speed(Some(f64::NAN)), 90.0);
        assert_eq!(reducer.snapshot().current_speed_kmh, 90.0);
    }

    #[test]
    fn test_snapshot_is_stable_under_reordering() {
        let mut a = MetricsReducer::new();
        a.set_distance(5.0);
        a.set_elapsed(600);

        let mut b = MetricsReducer::new();
        b.set_elapsed(600);
        b.set_distance(5.0);

        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.snapshot().average_speed_kmh, 30.0);
        assert_eq!(a.snapshot().elapsed_display, "10:00");
    }
}
