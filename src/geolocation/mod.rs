use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::TrackingResult;
use crate::models::waypoint::PositionSample;

pub mod hub;

pub use hub::{PermissionPolicy, PositionHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Forward a fix once either threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub min_interval: Duration,
    pub min_distance_m: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_m: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub Uuid);

/// A live subscription. The receiver closes once the handle is unsubscribed.
#[derive(Debug)]
pub struct PositionWatch {
    pub handle: SubscriptionHandle,
    pub receiver: mpsc::Receiver<PositionSample>,
}

#[async_trait]
pub trait GeolocationSource: Send + Sync {
    async fn request_permission(&self, device_id: &str) -> PermissionStatus;
    async fn get_current_position(&self, device_id: &str) -> TrackingResult<PositionSample>;
    async fn watch_position(
        &self,
        device_id: &str,
        options: WatchOptions,
    ) -> TrackingResult<PositionWatch>;
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}
