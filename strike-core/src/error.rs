//! Core errors

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the pure building blocks and the configuration layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Value outside its valid range
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("Failed to read configuration {path}: {reason}")]
    ConfigIo { path: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Calibration requested while another one is running
    #[error("Calibration already in progress")]
    CalibrationActive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::OutOfRange("angle 200".into());
        assert!(err.to_string().contains("Out of range"));
    }

    #[test]
    fn test_config_io_display() {
        let err = CoreError::ConfigIo {
            path: "strike.toml".into(),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read configuration strike.toml: not found"
        );
    }

    #[test]
    fn test_calibration_active() {
        assert_eq!(
            CoreError::CalibrationActive.to_string(),
            "Calibration already in progress"
        );
    }
}
