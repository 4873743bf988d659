use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{TrackingError, TrackingResult};
use crate::geolocation::{GeolocationSource, PermissionStatus, PositionWatch, WatchOptions};
use crate::models::trip::{TripRecord, TripStatus};
use crate::models::waypoint::{PositionSample, RouteSnapshot};
use crate::store::{persist_in_background, PersistenceHandle, TripStore};
use crate::tracking::metrics::TripMetrics;
use crate::tracking::session::TripSession;

const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Tracking,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Tracking => "tracking",
            SessionState::Stopped => "stopped",
        }
    }

    /// Status a trip record would carry at this point of the lifecycle.
    pub fn trip_status(&self) -> TripStatus {
        match self {
            SessionState::Idle => TripStatus::Scheduled,
            SessionState::Tracking => TripStatus::InProgress,
            SessionState::Stopped => TripStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    Position(PositionSample),
    Tick(DateTime<Utc>),
    SourceClosed,
}

struct ActiveTracking {
    session: TripSession,
    watch: PositionWatch,
    ticker: Interval,
    source_open: bool,
}

/// A finished trip. The record is final as soon as this is returned; the
/// write to the store may still be running.
#[derive(Debug)]
pub struct TripStop {
    pub record: TripRecord,
    pub persistence: PersistenceHandle,
}

/// Lifecycle of one trip for one device: idle -> tracking -> stopped.
///
/// All mutation goes through `&mut self`, so whoever owns the controller
/// is the only writer of its session. Readers get copies via `snapshot`.
pub struct TripSessionController {
    device_id: String,
    geolocation: Arc<dyn GeolocationSource>,
    store: Arc<dyn TripStore>,
    options: WatchOptions,
    state: SessionState,
    active: Option<ActiveTracking>,
}

impl TripSessionController {
    pub fn new(
        device_id: &str,
        geolocation: Arc<dyn GeolocationSource>,
        store: Arc<dyn TripStore>,
        options: WatchOptions,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            geolocation,
            store,
            options,
            state: SessionState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "Device {}: {} -> {}",
            self.device_id,
            self.state.trip_status().as_str(),
            next.trip_status().as_str()
        );
        self.state = next;
    }

    pub async fn start(
        &mut self,
        start_mileage: f64,
        start_label: Option<String>,
    ) -> TrackingResult<TripMetrics> {
        if self.state != SessionState::Idle {
            return Err(TrackingError::InvalidTransition {
                from: self.state.as_str(),
                action: "start trip",
            });
        }

        if self.geolocation.request_permission(&self.device_id).await == PermissionStatus::Denied {
            warn!("Location permission denied for device {}", self.device_id);
            return Err(TrackingError::PermissionDenied {
                device_id: self.device_id.clone(),
            });
        }

        let first_fix = self.geolocation.get_current_position(&self.device_id).await?;
        let watch = self
            .geolocation
            .watch_position(&self.device_id, self.options)
            .await?;

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let session = TripSession::begin(
            &self.device_id,
            Utc::now(),
            start_mileage,
            start_label,
            &first_fix,
        );
        let metrics = session.metrics();

        info!(
            "Started trip for device {} at ({}, {}), mileage {}",
            self.device_id, first_fix.latitude, first_fix.longitude, start_mileage
        );

        self.active = Some(ActiveTracking {
            session,
            watch,
            ticker,
            source_open: true,
        });
        self.transition(SessionState::Tracking);
        Ok(metrics)
    }

    /// Waits for the next position or tick. Never resolves unless tracking.
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn next_event(&mut self) -> TrackingEvent {
        let active = match self.active.as_mut() {
            Some(active) => active,
            None => return std::future::pending().await,
        };

        let source_open = active.source_open;
        tokio::select! {
            sample = active.watch.receiver.recv(), if source_open => match sample {
                Some(sample) => TrackingEvent::Position(sample),
                None => TrackingEvent::SourceClosed,
            },
            _ = active.ticker.tick() => TrackingEvent::Tick(Utc::now()),
        }
    }

    pub fn apply(&mut self, event: TrackingEvent) -> Option<TripMetrics> {
        let active = self.active.as_mut()?;
        match event {
            TrackingEvent::Position(sample) => {
                let metrics = active.session.record(&sample);
                debug!(
                    "Device {}: {} waypoints, {:.3} km, {} km/h",
                    self.device_id,
                    active.session.waypoints().len(),
                    metrics.distance_km,
                    metrics.current_speed_kmh
                );
                Some(metrics)
            }
            TrackingEvent::Tick(now) => Some(active.session.tick(now)),
            TrackingEvent::SourceClosed => {
                warn!("Position feed closed for device {}", self.device_id);
                active.source_open = false;
                None
            }
        }
    }

    /// Ends the trip. If the final fix can't be obtained the session keeps
    /// tracking and the caller may retry.
    pub async fn stop(&mut self, end_label: Option<String>) -> TrackingResult<TripStop> {
        if self.state != SessionState::Tracking {
            return Err(TrackingError::InvalidTransition {
                from: self.state.as_str(),
                action: "stop trip",
            });
        }

        let final_fix = match self.geolocation.get_current_position(&self.device_id).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!("Could not stop trip for device {}: {}", self.device_id, e);
                return Err(e);
            }
        };

        let mut session = self.close_route().await?;
        session.record(&final_fix);
        let record = session.finish(
            Uuid::new_v4().to_string(),
            Utc::now(),
            end_label,
            TripStatus::Completed,
        );
        self.transition(SessionState::Stopped);

        info!(
            "Ended trip {} for device {}: {:.2} km in {}s, avg {:.1} km/h",
            record.id,
            self.device_id,
            record.distance_km,
            record.elapsed_time_sec,
            record.average_speed_kmh
        );

        let persistence = persist_in_background(self.store.clone(), record.clone());
        Ok(TripStop {
            record,
            persistence,
        })
    }

    /// Abandons the trip without waiting for a final fix. The record ends at
    /// the last waypoint and is stored as cancelled.
    pub async fn cancel(&mut self, end_label: Option<String>) -> TrackingResult<TripStop> {
        if self.state != SessionState::Tracking {
            return Err(TrackingError::InvalidTransition {
                from: self.state.as_str(),
                action: "cancel trip",
            });
        }

        let session = self.close_route().await?;
        let record = session.finish(
            Uuid::new_v4().to_string(),
            Utc::now(),
            end_label,
            TripStatus::Cancelled,
        );
        self.transition(SessionState::Stopped);

        info!(
            "Cancelled trip {} for device {} after {:.2} km",
            record.id, self.device_id, record.distance_km
        );

        let persistence = persist_in_background(self.store.clone(), record.clone());
        Ok(TripStop {
            record,
            persistence,
        })
    }

    /// Tears down the watch and ticker. Fixes the watch already delivered
    /// are applied first, in arrival order.
    async fn close_route(&mut self) -> TrackingResult<TripSession> {
        let ActiveTracking {
            mut session,
            mut watch,
            ticker,
            ..
        } = match self.active.take() {
            Some(active) => active,
            None => return Err(TrackingError::SessionClosed),
        };
        drop(ticker);

        let mut pending = 0;
        while let Ok(sample) = watch.receiver.try_recv() {
            session.record(&sample);
            pending += 1;
        }
        if pending > 0 {
            debug!("Device {}: applied {} buffered fixes", self.device_id, pending);
        }
        self.geolocation.unsubscribe(watch.handle).await;

        Ok(session)
    }

    pub fn snapshot(&self) -> Option<RouteSnapshot> {
        self.active.as_ref().map(|a| a.session.snapshot())
    }
}
