//! Dispatch errors

use std::fmt;

use serde::{Deserialize, Serialize};
use strike_actuator::ActuatorError;
use strike_core::{CoreError, Trigger};
use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Why an admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Busy,
    Calibrating,
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::Busy => "busy",
            RejectReason::Calibrating => "calibration in progress",
            RejectReason::ShuttingDown => "shutting down",
        })
    }
}

/// Dispatch errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No channel for this identifier
    #[error("Unmapped identifier: {0}")]
    Unmapped(Trigger),

    /// Admission refused; the caller may retry later
    #[error("Admission rejected: {0}")]
    Rejected(RejectReason),

    /// Calibration requested while one is running
    #[error("Calibration already in progress")]
    CalibrationActive,

    /// Error from the actuation layer
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(CoreError),

    /// No tokio runtime to spawn runs on
    #[error("Runtime unavailable: {0}")]
    Runtime(String),
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CalibrationActive => DispatchError::CalibrationActive,
            other => DispatchError::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::Unmapped(Trigger::Note(61));
        assert_eq!(err.to_string(), "Unmapped identifier: note 61");

        let err = DispatchError::Rejected(RejectReason::Calibrating);
        assert_eq!(err.to_string(), "Admission rejected: calibration in progress");
    }

    #[test]
    fn test_core_error_conversion() {
        let err: DispatchError = CoreError::CalibrationActive.into();
        assert_eq!(err, DispatchError::CalibrationActive);

        let err: DispatchError = CoreError::InvalidConfig("x".into()).into();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn test_actuator_error_conversion() {
        let err: DispatchError = ActuatorError::Released.into();
        assert!(err.to_string().contains("Surface released"));
    }
}
