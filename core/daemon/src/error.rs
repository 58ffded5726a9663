//! Error taxonomy for engine operations.
//!
//! Every variant maps to a stable protocol code so clients can tell a
//! retryable location problem from a business rejection or a guard violation.

use attendance_daemon_protocol::{ErrorInfo, LocationUnavailableCause};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Location unavailable: {}", cause.as_str())]
    LocationUnavailable { cause: LocationUnavailableCause },

    #[error("Outside the office geofence: {distance_meters:.0} m away (radius {radius_meters:.0} m)")]
    OutOfGeofence {
        distance_meters: f64,
        radius_meters: f64,
    },

    #[error("Your day is already running")]
    SessionAlreadyActive,

    #[error("No running session for today")]
    SessionNotStarted,

    #[error("Today's session has already been closed")]
    DayAlreadyClosed,

    #[error("Daily progress has not been recorded")]
    ProgressNotSet,

    #[error("Review entry not found: {id}")]
    ReviewEntryNotFound { id: i64 },

    #[error("Timed out waiting for the session lock of {employee_id}")]
    LockTimeout { employee_id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::LocationUnavailable { .. } => "location_unavailable",
            EngineError::OutOfGeofence { .. } => "out_of_geofence",
            EngineError::SessionAlreadyActive => "session_already_active",
            EngineError::SessionNotStarted => "session_not_started",
            EngineError::DayAlreadyClosed => "day_already_closed",
            EngineError::ProgressNotSet => "progress_not_set",
            EngineError::ReviewEntryNotFound { .. } => "review_entry_not_found",
            EngineError::LockTimeout { .. } => "lock_timeout",
            EngineError::Storage(_) => "storage_error",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

impl From<String> for EngineError {
    fn from(message: String) -> Self {
        EngineError::Storage(message)
    }
}
