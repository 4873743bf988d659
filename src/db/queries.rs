pub const INSERT_TRIP_RECORD: &str = r#"
INSERT INTO trip_records (
    trip_id, device_id, start_time, end_time,
    start_mileage, end_mileage, distance_km, elapsed_time_sec, average_speed_kmh,
    start_label, start_lat, start_lng, end_label, end_lat, end_lng, status
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
ON CONFLICT (trip_id) DO NOTHING;
"#;
