//! Unified error handling for the trek-tracker library.
//!
//! Every fallible operation in the crate returns [`Result`], so hosts only
//! ever have to match on a single error type.

use thiserror::Error;

/// Unified error type for trek tracking and proximity operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrekError {
    /// The user (or the OS) refused location access
    #[error("Location permission denied")]
    PermissionDenied,
    /// Positioning hardware or service could not produce a fix
    #[error("Location unavailable: {message}")]
    LocationUnavailable { message: String },
    /// A position fetch did not complete in time
    #[error("Position fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// `start` was called while another session is still recording
    #[error("Session '{session_id}' is already active")]
    SessionAlreadyActive { session_id: String },
    /// A session operation was called with nothing recording
    #[error("No active tracking session")]
    NoActiveSession,
    /// `confirm_stop` without a preceding `request_stop`
    #[error("No stop request is pending")]
    NoStopPending,
    /// Rest stop id not present in the active session
    #[error("Rest stop {id} not found")]
    RestStopNotFound { id: u64 },
    /// Key-value store read or write failed
    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },
    /// Snapshot or payload could not be (de)serialized
    #[error("Serialization error: {message}")]
    Serialization { message: String },
    /// Latitude/longitude outside the valid range or not finite
    #[error("Invalid coordinates: {message}")]
    InvalidCoordinates { message: String },
    /// Configuration rejected by validation
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl TrekError {
    /// Errors from the location provider that degrade `start` to simulated tracking.
    pub fn is_position_failure(&self) -> bool {
        matches!(
            self,
            TrekError::PermissionDenied
                | TrekError::LocationUnavailable { .. }
                | TrekError::Timeout { .. }
        )
    }

    /// Stable machine-readable name, used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            TrekError::PermissionDenied => "PermissionDenied",
            TrekError::LocationUnavailable { .. } => "LocationUnavailable",
            TrekError::Timeout { .. } => "Timeout",
            TrekError::SessionAlreadyActive { .. } => "SessionAlreadyActive",
            TrekError::NoActiveSession => "NoActiveSession",
            TrekError::NoStopPending => "NoStopPending",
            TrekError::RestStopNotFound { .. } => "RestStopNotFound",
            TrekError::PersistenceFailure { .. } => "PersistenceFailure",
            TrekError::Serialization { .. } => "Serialization",
            TrekError::InvalidCoordinates { .. } => "InvalidCoordinates",
            TrekError::Config { .. } => "Config",
        }
    }

    pub(crate) fn persistence(message: impl Into<String>) -> Self {
        TrekError::PersistenceFailure {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TrekError {
    fn from(err: serde_json::Error) -> Self {
        TrekError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrekError {
    fn from(err: rusqlite::Error) -> Self {
        TrekError::persistence(err.to_string())
    }
}

/// Result type alias for trek-tracker operations.
pub type Result<T> = std::result::Result<T, TrekError>;

/// Extension trait for converting Option to TrekError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a no-active-session error.
    fn ok_or_no_active_session(self) -> Result<T>;

    /// Convert Option to Result with a location-unavailable error.
    fn ok_or_unavailable(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_active_session(self) -> Result<T> {
        self.ok_or(TrekError::NoActiveSession)
    }

    fn ok_or_unavailable(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrekError::LocationUnavailable {
            message: message.to_string(),
        })
    }
}
