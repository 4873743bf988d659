use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::{queries, DbPool};
use crate::errors::{TrackingError, TrackingResult};
use crate::models::trip::TripRecord;

#[async_trait]
pub trait TripStore: Send + Sync {
    async fn save_trip_record(&self, record: &TripRecord) -> TrackingResult<()>;
}

pub struct PgTripStore {
    pool: DbPool,
}

impl PgTripStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn save_trip_record(&self, record: &TripRecord) -> TrackingResult<()> {
        let trip_id = Uuid::parse_str(&record.id)
            .map_err(|e| TrackingError::PersistenceFailure(format!("bad trip id: {}", e)))?;

        sqlx::query(queries::INSERT_TRIP_RECORD)
            .bind(trip_id)
            .bind(&record.device_id)
            .bind(record.start_time)
            .bind(record.end_time)
            .bind(record.start_mileage)
            .bind(record.end_mileage)
            .bind(record.distance_km)
            .bind(record.elapsed_time_sec as i64)
            .bind(record.average_speed_kmh)
            .bind(record.start_location.label.as_deref())
            .bind(record.start_location.latitude)
            .bind(record.start_location.longitude)
            .bind(record.end_location.label.as_deref())
            .bind(record.end_location.latitude)
            .bind(record.end_location.longitude)
            .bind(record.status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Result of a detached trip write. Dropping it leaves the write running.
#[derive(Debug)]
pub struct PersistenceHandle {
    inner: JoinHandle<TrackingResult<()>>,
}

impl PersistenceHandle {
    /// Waits for the write. Failures were already logged by the task.
    pub async fn outcome(self) -> TrackingResult<()> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(TrackingError::PersistenceFailure(format!(
                "persistence task aborted: {}",
                e
            ))),
        }
    }
}

/// Writes the record on a spawned task. A failure is logged and never
/// reaches whoever stopped the trip.
pub fn persist_in_background(store: Arc<dyn TripStore>, record: TripRecord) -> PersistenceHandle {
    let inner = tokio::spawn(async move {
        match store.save_trip_record(&record).await {
            Ok(()) => {
                info!("Saved trip {} for device {}", record.id, record.device_id);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Error saving trip {} for device {}: {}",
                    record.id, record.device_id, e
                );
                Err(e)
            }
        }
    });
    PersistenceHandle { inner }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// In-memory store for tests; optionally fails every write.
    #[derive(Default)]
    pub struct MemoryTripStore {
        pub saved: Mutex<Vec<TripRecord>>,
        pub fail: bool,
    }

    impl MemoryTripStore {
        pub fn failing() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl TripStore for MemoryTripStore {
        async fn save_trip_record(&self, record: &TripRecord) -> TrackingResult<()> {
            if self.fail {
                return Err(TrackingError::PersistenceFailure(
                    "database unreachable".to_string(),
                ));
            }
            self.saved.lock().await.push(record.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryTripStore;
    use super::*;
    use crate::models::trip::{TripEndpoint, TripStatus};
    use chrono::Utc;

    fn record() -> TripRecord {
        let now = Utc::now();
        let here = TripEndpoint {
            label: None,
            latitude: -15.3875,
            longitude: 28.3228,
        };
        TripRecord {
            id: Uuid::new_v4().to_string(),
            device_id: "truck-1".into(),
            start_mileage: 45000.0,
            end_mileage: 45012.0,
            distance_km: 12.34,
            elapsed_time_sec: 1800,
            average_speed_kmh: 24.68,
            start_location: here.clone(),
            end_location: here,
            start_time: now,
            end_time: now,
            status: TripStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_background_write_lands_in_store() {
        let store = Arc::new(MemoryTripStore::default());
        let handle = persist_in_background(store.clone(), record());
        handle.outcome().await.unwrap();
        assert_eq!(store.saved.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_background_failure_is_reported_only_to_the_handle() {
        let store = Arc::new(MemoryTripStore::failing());
        let handle = persist_in_background(store.clone(), record());
        let err = handle.outcome().await.unwrap_err();
        assert!(matches!(err, TrackingError::PersistenceFailure(_)));
        assert!(store.saved.lock().await.is_empty());
    }
}
