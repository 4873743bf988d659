use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Location permission denied for device {device_id}")]
    PermissionDenied { device_id: String },

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Failed to persist trip record: {0}")]
    PersistenceFailure(String),

    #[error("Cannot {action} while session is {from}")]
    InvalidTransition { from: &'static str, action: &'static str },

    #[error("Session task is no longer running")]
    SessionClosed,
}

impl From<sqlx::Error> for TrackingError {
    fn from(e: sqlx::Error) -> Self {
        TrackingError::PersistenceFailure(e.to_string())
    }
}

impl TrackingError {
    /// Errors the driver/dispatcher should be told about. Persistence
    /// failures are only ever logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            TrackingError::PermissionDenied { .. } | TrackingError::LocationUnavailable(_)
        )
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;
