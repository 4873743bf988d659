use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::TrackingError;
use crate::geolocation::PositionHub;
use crate::models::message::{DeviceReport, IgnitionEvent, InboundMessage, TripAction, TripCommandMessage};
use crate::tracking::TripSessionManager;

/// What the processor needs to turn topic traffic into trip sessions.
#[derive(Clone)]
pub struct TrackingServices {
    pub hub: Arc<PositionHub>,
    pub sessions: Arc<TripSessionManager>,
}

pub async fn process_message(services: &TrackingServices, payload: &[u8]) -> anyhow::Result<()> {
    // 1. Parse JSON
    let message: InboundMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message: {}", e);
            return Ok(());
        }
    };

    // 2. Dispatch by payload kind
    match message {
        InboundMessage::Command(command) => process_command(services, command).await,
        InboundMessage::Report(report) => process_report(services, report).await,
    }
}

async fn process_command(
    services: &TrackingServices,
    command: TripCommandMessage,
) -> anyhow::Result<()> {
    let device_id = command.device_id.as_str();
    match command.command {
        TripAction::StartTrip => {
            let start_mileage = command.start_mileage.unwrap_or(0.0);
            let result = services
                .sessions
                .start_trip(device_id, start_mileage, command.location)
                .await
                .map(|_| ());
            log_outcome(device_id, "start trip", result)
        }
        TripAction::StopTrip => {
            let result = services
                .sessions
                .stop_trip(device_id, command.location)
                .await
                .map(|record| {
                    info!(
                        "Trip {} for device {} closed at mileage {}",
                        record.id, device_id, record.end_mileage
                    );
                });
            log_outcome(device_id, "stop trip", result)
        }
        TripAction::CancelTrip => {
            let result = services
                .sessions
                .cancel_trip(device_id, command.location)
                .await
                .map(|record| {
                    info!("Trip {} for device {} cancelled", record.id, device_id);
                });
            log_outcome(device_id, "cancel trip", result)
        }
    }
}

async fn process_report(services: &TrackingServices, report: DeviceReport) -> anyhow::Result<()> {
    let device_id = match report.get_device_id() {
        Some(id) => id.clone(),
        None => {
            warn!("Message missing device_id, skipping");
            return Ok(());
        }
    };

    debug!("Processing report {} for device {}", report.uuid, device_id);

    // Publish before acting on ignition so the report's own fix is the
    // position a new trip starts from.
    match report.position_sample() {
        Some(sample) => services.hub.publish(&device_id, sample).await,
        None => warn!("Report from {} has no usable fix ({:?})", device_id, report.data.gps_datetime),
    }

    // Ignition alerts open and close trips; plain points only feed the hub
    match report.ignition_event() {
        // Engine ON -> Start Trip
        Some(IgnitionEvent::On) => {
            let start_mileage = report.data.odometer.unwrap_or(0.0);
            let result = services
                .sessions
                .start_trip(&device_id, start_mileage, None)
                .await
                .map(|_| ());
            log_outcome(&device_id, "start trip", result)
        }
        // Engine OFF -> End Trip
        Some(IgnitionEvent::Off) => {
            let result = services
                .sessions
                .stop_trip(&device_id, None)
                .await
                .map(|record| {
                    info!("Trip {} for device {} closed by ignition off", record.id, device_id);
                });
            log_outcome(&device_id, "stop trip", result)
        }
        None => Ok(()),
    }
}

fn log_outcome(
    device_id: &str,
    action: &str,
    result: Result<(), TrackingError>,
) -> anyhow::Result<()> {
    match result {
        Ok(()) => {
            info!("{} accepted for device {}", action, device_id);
            Ok(())
        }
        Err(e) if e.is_user_facing() => {
            warn!("{} failed for device {}: {}", action, device_id, e);
            Ok(())
        }
        Err(e @ TrackingError::InvalidTransition { .. }) => {
            info!("Ignored {} for device {}: {}", action, device_id, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
