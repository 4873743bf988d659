use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{GeolocationSource, PermissionStatus, PositionWatch, SubscriptionHandle, WatchOptions};
use crate::errors::{TrackingError, TrackingResult};
use crate::models::waypoint::{PositionSample, Waypoint};
use crate::tracking::distance::haversine_km;

const WATCH_CHANNEL_CAPACITY: usize = 64;

/// Which devices have granted location access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    All,
    Devices(HashSet<String>),
}

impl PermissionPolicy {
    /// `*` (or empty) grants everyone, otherwise a comma separated allow-list.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return PermissionPolicy::All;
        }
        PermissionPolicy::Devices(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn allows(&self, device_id: &str) -> bool {
        match self {
            PermissionPolicy::All => true,
            PermissionPolicy::Devices(devices) => devices.contains(device_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LatestFix {
    sample: PositionSample,
    received_at: Instant,
}

struct Watcher {
    device_id: String,
    options: WatchOptions,
    last_forwarded: Option<(PositionSample, Instant)>,
    tx: mpsc::Sender<PositionSample>,
}

impl Watcher {
    fn should_forward(&self, sample: &PositionSample, now: Instant) -> bool {
        match &self.last_forwarded {
            None => true,
            Some((previous, at)) => {
                let moved_m =
                    haversine_km(&Waypoint::from(previous), &Waypoint::from(sample)) * 1000.0;
                now.duration_since(*at) >= self.options.min_interval
                    || moved_m >= self.options.min_distance_m
            }
        }
    }
}

/// Geolocation source fed by device reports coming off the tracking topic.
pub struct PositionHub {
    policy: PermissionPolicy,
    fix_max_age: Duration,
    fix_timeout: Duration,
    feeds: RwLock<HashMap<String, watch::Sender<Option<LatestFix>>>>,
    watchers: Mutex<HashMap<SubscriptionHandle, Watcher>>,
}

impl PositionHub {
    pub fn new(policy: PermissionPolicy, fix_max_age: Duration, fix_timeout: Duration) -> Self {
        Self {
            policy,
            fix_max_age,
            fix_timeout,
            feeds: RwLock::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Records the fix as the device's latest and forwards it to its watches.
    pub async fn publish(&self, device_id: &str, sample: PositionSample) {
        let now = Instant::now();
        let fix = LatestFix {
            sample,
            received_at: now,
        };

        let known = {
            let feeds = self.feeds.read().await;
            match feeds.get(device_id) {
                Some(feed) => {
                    feed.send_replace(Some(fix));
                    true
                }
                None => false,
            }
        };
        if !known {
            self.feeds
                .write()
                .await
                .entry(device_id.to_string())
                .or_insert_with(|| watch::channel(None).0)
                .send_replace(Some(fix));
        }

        let mut watchers = self.watchers.lock().await;
        let mut closed = Vec::new();
        for (handle, watcher) in watchers.iter_mut() {
            if watcher.device_id != device_id || !watcher.should_forward(&sample, now) {
                continue;
            }
            match watcher.tx.try_send(sample) {
                Ok(()) => watcher.last_forwarded = Some((sample, now)),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Watch {:?} for device {} is lagging, dropping fix", handle, device_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*handle),
            }
        }
        for handle in closed {
            debug!("Removing closed watch {:?}", handle);
            watchers.remove(&handle);
        }
    }

    async fn feed_receiver(&self, device_id: &str) -> watch::Receiver<Option<LatestFix>> {
        {
            let feeds = self.feeds.read().await;
            if let Some(feed) = feeds.get(device_id) {
                return feed.subscribe();
            }
        }
        self.feeds
            .write()
            .await
            .entry(device_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    #[cfg(test)]
    pub async fn active_watches(&self) -> usize {
        self.watchers.lock().await.len()
    }
}

#[async_trait]
impl GeolocationSource for PositionHub {
    async fn request_permission(&self, device_id: &str) -> PermissionStatus {
        if self.policy.allows(device_id) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn get_current_position(&self, device_id: &str) -> TrackingResult<PositionSample> {
        let mut rx = self.feed_receiver(device_id).await;

        let cached = *rx.borrow_and_update();
        if let Some(fix) = cached {
            if fix.received_at.elapsed() <= self.fix_max_age {
                return Ok(fix.sample);
            }
        }

        match tokio::time::timeout(self.fix_timeout, rx.changed()).await {
            Ok(Ok(())) => {
                let latest = *rx.borrow();
                latest.map(|fix| fix.sample).ok_or_else(|| {
                    TrackingError::LocationUnavailable(format!("no fix for device {}", device_id))
                })
            }
            Ok(Err(_)) => Err(TrackingError::LocationUnavailable(format!(
                "position feed for device {} closed",
                device_id
            ))),
            Err(_) => Err(TrackingError::LocationUnavailable(format!(
                "no fix from device {} within {}s",
                device_id,
                self.fix_timeout.as_secs_f64()
            ))),
        }
    }

    async fn watch_position(
        &self,
        device_id: &str,
        options: WatchOptions,
    ) -> TrackingResult<PositionWatch> {
        let (tx, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let handle = SubscriptionHandle(Uuid::new_v4());
        self.watchers.lock().await.insert(
            handle,
            Watcher {
                device_id: device_id.to_string(),
                options,
                last_forwarded: None,
                tx,
            },
        );
        info!(
            "Watching device {} (every {:?} or {} m)",
            device_id, options.min_interval, options.min_distance_m
        );
        Ok(PositionWatch { handle, receiver })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.watchers.lock().await.remove(&handle).is_some() {
            debug!("Unsubscribed watch {:?}", handle);
        }
    }
}
