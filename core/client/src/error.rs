use attendance_daemon_protocol::LocationUnavailableCause;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("location unavailable ({}): {}", .cause.as_str(), .cause.user_message())]
    LocationUnavailable { cause: LocationUnavailableCause },
}

impl ResolveError {
    pub fn cause(&self) -> LocationUnavailableCause {
        match self {
            ResolveError::LocationUnavailable { cause } => *cause,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon unreachable: {0}")]
    Transport(String),
    #[error("{message}")]
    Daemon { code: String, message: String },
    #[error("unexpected daemon response: {0}")]
    Decode(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Usage(String),
}

impl ClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Daemon { code, .. } => Some(code.as_str()),
            ClientError::Resolve(_) => Some("location_unavailable"),
            _ => None,
        }
    }
}
