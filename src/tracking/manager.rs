use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::errors::{TrackingError, TrackingResult};
use crate::geolocation::{GeolocationSource, WatchOptions};
use crate::models::trip::TripRecord;
#[cfg(test)]
use crate::models::waypoint::RouteSnapshot;
use crate::models::waypoint::Waypoint;
use crate::store::{PersistenceHandle, TripStore};
use crate::tracking::controller::{SessionState, TrackingEvent, TripSessionController, TripStop};
use crate::tracking::metrics::TripMetrics;

const COMMAND_CHANNEL_CAPACITY: usize = 16;
/// Route summary cadence, in 1 s ticks.
const ROUTE_LOG_TICKS: u64 = 60;

/// How a command finds its driver task.
#[derive(Clone, Copy)]
enum Dispatch {
    /// Spawn a task when the device has none.
    Spawn,
    /// Only reach a running trip; otherwise the action is rejected as idle.
    Existing(&'static str),
}

impl Dispatch {
    fn action(&self) -> &'static str {
        match self {
            Dispatch::Spawn => "start trip",
            Dispatch::Existing(action) => *action,
        }
    }
}

type SessionMap = Arc<Mutex<HashMap<String, mpsc::Sender<SessionCommand>>>>;

enum SessionCommand {
    Start {
        start_mileage: f64,
        location: Option<String>,
        reply: oneshot::Sender<TrackingResult<TripMetrics>>,
    },
    Stop {
        location: Option<String>,
        reply: oneshot::Sender<TrackingResult<TripRecord>>,
    },
    Cancel {
        location: Option<String>,
        reply: oneshot::Sender<TrackingResult<TripRecord>>,
    },
    #[cfg(test)]
    Snapshot {
        reply: oneshot::Sender<Option<RouteSnapshot>>,
    },
}

impl SessionCommand {
    fn reject(self, error: TrackingError) {
        match self {
            SessionCommand::Start { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::Stop { reply, .. } | SessionCommand::Cancel { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            #[cfg(test)]
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(None);
            }
        }
    }
}

/// Routes start/stop actions to one driver task per tracked device. Each
/// task owns that device's controller, so a session is only touched from its
/// task. A task lives for exactly one trip and removes its own entry.
pub struct TripSessionManager {
    geolocation: Arc<dyn GeolocationSource>,
    store: Arc<dyn TripStore>,
    options: WatchOptions,
    sessions: SessionMap,
}

impl TripSessionManager {
    pub fn new(
        geolocation: Arc<dyn GeolocationSource>,
        store: Arc<dyn TripStore>,
        options: WatchOptions,
    ) -> Self {
        Self {
            geolocation,
            store,
            options,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn start_trip(
        &self,
        device_id: &str,
        start_mileage: f64,
        location: Option<String>,
    ) -> TrackingResult<TripMetrics> {
        self.request(device_id, Dispatch::Spawn, |reply| SessionCommand::Start {
            start_mileage,
            location: location.clone(),
            reply,
        })
        .await
    }

    /// Returns once the record is built; the store write runs detached.
    pub async fn stop_trip(
        &self,
        device_id: &str,
        location: Option<String>,
    ) -> TrackingResult<TripRecord> {
        self.request(device_id, Dispatch::Existing("stop trip"), |reply| SessionCommand::Stop {
            location: location.clone(),
            reply,
        })
        .await
    }

    pub async fn cancel_trip(
        &self,
        device_id: &str,
        location: Option<String>,
    ) -> TrackingResult<TripRecord> {
        self.request(device_id, Dispatch::Existing("cancel trip"), |reply| SessionCommand::Cancel {
            location: location.clone(),
            reply,
        })
        .await
    }

    /// Copy of the device's current route for the map view.
    #[cfg(test)]
    pub async fn snapshot(&self, device_id: &str) -> Option<RouteSnapshot> {
        let sender = self
            .live_sender(device_id, Dispatch::Existing("snapshot"))
            .await?;
        let (reply, rx) = oneshot::channel();
        sender.send(SessionCommand::Snapshot { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    #[cfg(test)]
    pub async fn tracked_devices(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Sends a command to the device's task and waits for the reply. A task
    /// that retires while the command is in flight answers `SessionClosed`;
    /// the command is then retried once against the next task.
    async fn request<T>(
        &self,
        device_id: &str,
        dispatch: Dispatch,
        command: impl Fn(oneshot::Sender<TrackingResult<T>>) -> SessionCommand,
    ) -> TrackingResult<T> {
        let mut retried = false;
        loop {
            let sender = match self.live_sender(device_id, dispatch).await {
                Some(sender) => sender,
                None => {
                    return Err(TrackingError::InvalidTransition {
                        from: SessionState::Idle.as_str(),
                        action: dispatch.action(),
                    })
                }
            };

            let (reply, rx) = oneshot::channel();
            let outcome = match sender.send(command(reply)).await {
                Ok(()) => rx.await.unwrap_or(Err(TrackingError::SessionClosed)),
                Err(_) => Err(TrackingError::SessionClosed),
            };
            match outcome {
                Err(TrackingError::SessionClosed) if !retried => {
                    debug!("Session task for device {} retired, retrying", device_id);
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// The device's command channel. Without a running task, one is spawned
    /// for `Dispatch::Spawn` and None is returned otherwise.
    async fn live_sender(
        &self,
        device_id: &str,
        dispatch: Dispatch,
    ) -> Option<mpsc::Sender<SessionCommand>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(tx) = sessions.get(device_id) {
            if !tx.is_closed() {
                return Some(tx.clone());
            }
            sessions.remove(device_id);
        }
        if let Dispatch::Existing(_) = dispatch {
            return None;
        }

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let controller = TripSessionController::new(
            device_id,
            self.geolocation.clone(),
            self.store.clone(),
            self.options,
        );
        tokio::spawn(drive_device(controller, rx, self.sessions.clone()));
        sessions.insert(device_id.to_string(), tx.clone());
        Some(tx)
    }
}

async fn drive_device(
    mut controller: TripSessionController,
    mut commands: mpsc::Receiver<SessionCommand>,
    sessions: SessionMap,
) {
    debug!("Session task up for device {}", controller.device_id());

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if let Some(persistence) = handle(&mut controller, command, &mut commands, &sessions).await {
                    // the caller already has its record; this only reports the write
                    if persistence.outcome().await.is_ok() {
                        debug!("Trip write for device {} settled", controller.device_id());
                    }
                }
                if controller.state() != SessionState::Tracking {
                    break;
                }
            }
            event = controller.next_event() => {
                let is_tick = matches!(event, TrackingEvent::Tick(_));
                controller.apply(event);
                if is_tick {
                    ticks += 1;
                    if ticks % ROUTE_LOG_TICKS == 0 {
                        log_route(&controller);
                    }
                }
            }
        }
    }

    if controller.state() == SessionState::Tracking {
        warn!(
            "Session task for device {} exiting with a trip still in progress",
            controller.device_id()
        );
    }
    info!("Session task for device {} finished", controller.device_id());
}

fn log_route(controller: &TripSessionController) {
    if let Some(route) = controller.snapshot() {
        let at = |w: Option<Waypoint>| w.map(|w| (w.latitude, w.longitude));
        info!(
            "Device {} route: {} waypoints from {:?}, now at {:?}",
            controller.device_id(),
            route.waypoints.len(),
            at(route.start_position),
            at(route.current_position)
        );
    }
}

/// Runs one command. Once the trip is over the task retires before replying,
/// so the caller never sees a stale entry.
async fn handle(
    controller: &mut TripSessionController,
    command: SessionCommand,
    commands: &mut mpsc::Receiver<SessionCommand>,
    sessions: &SessionMap,
) -> Option<PersistenceHandle> {
    match command {
        SessionCommand::Start { start_mileage, location, reply } => {
            let result = controller.start(start_mileage, location).await;
            retire_if_done(controller, commands, sessions).await;
            let _ = reply.send(result);
            None
        }
        SessionCommand::Stop { location, reply } => {
            let result = controller.stop(location).await;
            finish(controller, result, reply, commands, sessions).await
        }
        SessionCommand::Cancel { location, reply } => {
            let result = controller.cancel(location).await;
            finish(controller, result, reply, commands, sessions).await
        }
        #[cfg(test)]
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(controller.snapshot());
            None
        }
    }
}

async fn finish(
    controller: &TripSessionController,
    result: TrackingResult<TripStop>,
    reply: oneshot::Sender<TrackingResult<TripRecord>>,
    commands: &mut mpsc::Receiver<SessionCommand>,
    sessions: &SessionMap,
) -> Option<PersistenceHandle> {
    retire_if_done(controller, commands, sessions).await;
    match result {
        Ok(TripStop { record, persistence }) => {
            let _ = reply.send(Ok(record));
            Some(persistence)
        }
        Err(e) => {
            let _ = reply.send(Err(e));
            None
        }
    }
}

/// Drops the device's entry once its controller is no longer tracking.
/// Commands that raced in are answered with `SessionClosed` so their
/// senders retry against a new task.
async fn retire_if_done(
    controller: &TripSessionController,
    commands: &mut mpsc::Receiver<SessionCommand>,
    sessions: &SessionMap,
) {
    if controller.state() == SessionState::Tracking {
        return;
    }

    let mut sessions = sessions.lock().await;
    commands.close();
    sessions.remove(controller.device_id());
    drop(sessions);

    while let Ok(command) = commands.try_recv() {
        command.reject(TrackingError::SessionClosed);
    }
    debug!("Retired session task for device {}", controller.device_id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geolocation::{PermissionPolicy, PositionHub};
    use crate::models::trip::TripStatus;
    use crate::models::waypoint::PositionSample;
    use crate::store::testing::MemoryTripStore;
    use chrono::Utc;
    use std::time::Duration;

    fn setup(policy: PermissionPolicy) -> (Arc<PositionHub>, Arc<MemoryTripStore>, TripSessionManager) {
        let hub = Arc::new(PositionHub::new(
            policy,
            Duration::from_secs(30),
            Duration::from_millis(100),
        ));
        let store = Arc::new(MemoryTripStore::default());
        let options = WatchOptions {
            min_interval: Duration::ZERO,
            min_distance_m: 0.0,
        };
        let manager = TripSessionManager::new(hub.clone(), store.clone(), options);
        (hub, store, manager)
    }

    fn fix(latitude: f64, longitude: f64) -> PositionSample {
        PositionSample::new(latitude, longitude, Utc::now())
    }

    async fn wait_for_saved(store: &MemoryTripStore, count: usize) {
        for _ in 0..100 {
            if store.saved.lock().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached {} records", count);
    }

    #[tokio::test]
    async fn test_full_trip_through_the_manager() {
        let (hub, store, manager) = setup(PermissionPolicy::All);
        hub.publish("truck-1", fix(-15.3875, 28.3228)).await;

        manager
            .start_trip("truck-1", 45000.0, Some("Depot".into()))
            .await
            .unwrap();

        hub.publish("truck-1", fix(-15.3900, 28.3250)).await;
        for _ in 0..100 {
            if manager.snapshot("truck-1").await.map(|s| s.waypoints.len()) == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let record = manager.stop_trip("truck-1", Some("Site B".into())).await.unwrap();
        assert!((record.distance_km - 0.3646).abs() < 0.001);
        assert_eq!(record.status, TripStatus::Completed);
        assert_eq!(record.end_location.label.as_deref(), Some("Site B"));
        assert!(manager.snapshot("truck-1").await.is_none());

        wait_for_saved(&store, 1).await;
        assert_eq!(store.saved.lock().await[0].id, record.id);
    }

    #[tokio::test]
    async fn test_new_trip_after_stop_gets_a_fresh_session() {
        let (hub, store, manager) = setup(PermissionPolicy::All);
        hub.publish("truck-1", fix(-15.3875, 28.3228)).await;

        manager.start_trip("truck-1", 100.0, None).await.unwrap();
        let first = manager.stop_trip("truck-1", None).await.unwrap();
        manager.start_trip("truck-1", 200.0, None).await.unwrap();
        let second = manager.stop_trip("truck-1", None).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.start_mileage, 200.0);
        wait_for_saved(&store, 2).await;
    }

    #[tokio::test]
    async fn test_denied_device_reports_error_and_records_nothing() {
        let (hub, store, manager) = setup(PermissionPolicy::parse("truck-1"));
        hub.publish("truck-2", fix(-15.3875, 28.3228)).await;

        let err = manager.start_trip("truck-2", 0.0, None).await.unwrap_err();
        assert!(matches!(err, TrackingError::PermissionDenied { .. }));
        assert!(manager.snapshot("truck-2").await.is_none());
        assert!(matches!(
            manager.stop_trip("truck-2", None).await,
            Err(TrackingError::InvalidTransition { from: "idle", .. })
        ));
        assert!(store.saved.lock().await.is_empty());
        assert_eq!(manager.tracked_devices().await, 0);
    }

    #[tokio::test]
    async fn test_stray_stops_leave_no_session_behind() {
        let (_hub, store, manager) = setup(PermissionPolicy::All);

        for i in 0..50 {
            let device = format!("dev-{}", i);
            assert!(matches!(
                manager.stop_trip(&device, None).await,
                Err(TrackingError::InvalidTransition { from: "idle", action: "stop trip" })
            ));
        }
        assert!(matches!(
            manager.cancel_trip("dev-0", None).await,
            Err(TrackingError::InvalidTransition { action: "cancel trip", .. })
        ));

        assert_eq!(manager.tracked_devices().await, 0);
        assert!(store.saved.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_finished_trip_releases_its_device() {
        let (hub, store, manager) = setup(PermissionPolicy::All);
        hub.publish("truck-1", fix(-15.3875, 28.3228)).await;
        hub.publish("truck-2", fix(-15.3875, 28.3228)).await;

        manager.start_trip("truck-1", 0.0, None).await.unwrap();
        manager.start_trip("truck-2", 0.0, None).await.unwrap();
        assert_eq!(manager.tracked_devices().await, 2);

        manager.stop_trip("truck-1", None).await.unwrap();
        assert_eq!(manager.tracked_devices().await, 1);
        let cancelled = manager.cancel_trip("truck-2", None).await.unwrap();
        assert_eq!(cancelled.status, TripStatus::Cancelled);
        assert_eq!(manager.tracked_devices().await, 0);

        wait_for_saved(&store, 2).await;
        assert!(matches!(
            manager.stop_trip("truck-1", None).await,
            Err(TrackingError::InvalidTransition { from: "idle", .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_right_after_a_burst_keeps_the_whole_route() {
        let (hub, _store, manager) = setup(PermissionPolicy::All);
        hub.publish("truck-1", fix(0.0, 0.0)).await;
        manager.start_trip("truck-1", 0.0, None).await.unwrap();

        hub.publish("truck-1", fix(1.0, 0.0)).await;
        hub.publish("truck-1", fix(0.0, 0.0)).await;
        let record = manager.stop_trip("truck-1", None).await.unwrap();

        assert!((record.distance_km - 222.39).abs() < 0.01);
        assert_eq!(record.end_mileage, 222.0);
    }
}
