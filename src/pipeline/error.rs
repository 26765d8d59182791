//! Station error types and reporting.

use std::fmt;

/// Errors a station can return for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// The input is dropped and the station keeps running.
    Recoverable(String),
    /// The station stops after reporting.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

impl From<crate::error::ParleyError> for StationError {
    fn from(error: crate::error::ParleyError) -> Self {
        if error.is_fatal() {
            StationError::Fatal(error.to_string())
        } else {
            StationError::Recoverable(error.to_string())
        }
    }
}

/// Receives every error a station returns.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, station: &str, error: &StationError);
}

/// Reports through `tracing`: recoverable errors at warn, fatal at error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => {
                tracing::warn!(target: "parley::station", station, "{}", msg)
            }
            StationError::Fatal(msg) => {
                tracing::error!(target: "parley::station", station, "{}", msg)
            }
        }
    }
}
