use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::models::waypoint::PositionSample;

/// Anything that can show up on the tracking topic.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Command(TripCommandMessage),
    Report(DeviceReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripAction {
    StartTrip,
    StopTrip,
    CancelTrip,
}

/// Explicit start/stop/cancel issued from the driver or dispatch app.
#[derive(Debug, Deserialize)]
pub struct TripCommandMessage {
    pub command: TripAction,
    pub device_id: String,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub start_mileage: Option<f64>,
    pub location: Option<String>,
}

/// Periodic report from an in-vehicle tracker.
#[derive(Debug, Deserialize)]
pub struct DeviceReport {
    pub data: Data,
    pub metadata: Metadata,
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct Data {
    #[serde(rename = "ALERT")]
    pub alert: Option<String>,
    #[serde(rename = "GPS_DATETIME")]
    pub gps_datetime: Option<String>,
    #[serde(rename = "LATITUD", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONGITUD", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(rename = "SPEED", default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>, // km/h
    #[serde(rename = "ODOMETER", default, deserialize_with = "parse_f64_option")]
    pub odometer: Option<f64>, // km
    #[serde(rename = "GPS_ACCURACY", default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnitionEvent {
    On,
    Off,
}

impl DeviceReport {
    pub fn get_device_id(&self) -> Option<&String> {
        self.data.device_id.as_ref().or(self.metadata.device_id.as_ref())
    }

    pub fn ignition_event(&self) -> Option<IgnitionEvent> {
        match self.data.alert.as_deref().map(|s| s.to_uppercase()).as_deref() {
            Some("ENGINE ON") => Some(IgnitionEvent::On),
            Some("ENGINE OFF") => Some(IgnitionEvent::Off),
            _ => None,
        }
    }

    pub fn gps_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_gps_datetime(self.data.gps_datetime.as_deref().unwrap_or(""))
    }

    /// Returns None when the report carries no usable fix.
    pub fn position_sample(&self) -> Option<PositionSample> {
        let latitude = self.data.latitude?;
        let longitude = self.data.longitude?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        let timestamp = self.gps_timestamp()?;

        Some(PositionSample {
            latitude,
            longitude,
            speed_mps: self.data.speed.map(|kmh| kmh / 3.6),
            accuracy_m: self.data.accuracy,
            timestamp,
        })
    }
}

pub fn parse_gps_datetime(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|t| t.and_utc())
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
