use crate::models::waypoint::Waypoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two waypoints in kilometres (Haversine).
pub fn haversine_km(from: &Waypoint, to: &Waypoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // rounding can push `a` a hair outside [0, 1] for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Sum of consecutive segment lengths over the whole route.
pub fn total_distance_km(waypoints: &[Waypoint]) -> f64 {
    if waypoints.len() < 2 {
        return 0.0;
    }

    waypoints
        .windows(2)
        .map(|w| haversine_km(&w[0], &w[1]))
        .sum()
}
