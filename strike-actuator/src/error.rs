//! Actuation layer errors

use strike_core::{Channel, CoreError};
use thiserror::Error;

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Actuation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// The surface refused or failed a write
    #[error("Surface write failed on {channel}: {reason}")]
    SurfaceWrite { channel: Channel, reason: String },

    /// Channel not present on the surface
    #[error("{channel} outside the surface's {count} channels")]
    ChannelOutOfRange { channel: Channel, count: usize },

    /// Angle rejected by the position model
    #[error("Position error: {0}")]
    Position(#[from] CoreError),

    /// Surface unreachable or misconfigured at startup
    #[error("Surface not initialized: {0}")]
    NotInitialized(String),

    /// Surface already released
    #[error("Surface released")]
    Released,

    /// Run interrupted by shutdown at a step boundary
    #[error("Run on {channel} cancelled after {completed_steps} step(s)")]
    Cancelled { channel: Channel, completed_steps: usize },
}

impl ActuatorError {
    /// Whether the error came from a shutdown interruption rather than a fault
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ActuatorError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_write_display() {
        let err = ActuatorError::SurfaceWrite {
            channel: Channel::from(3),
            reason: "i2c nack".into(),
        };
        assert_eq!(err.to_string(), "Surface write failed on ch3: i2c nack");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = ActuatorError::ChannelOutOfRange {
            channel: Channel::from(20),
            count: 16,
        };
        assert!(err.to_string().contains("16 channels"));
    }

    #[test]
    fn test_error_conversion_from_core() {
        let err: ActuatorError = CoreError::OutOfRange("angle".into()).into();
        assert!(matches!(err, ActuatorError::Position(_)));
    }

    #[test]
    fn test_cancellation_flag() {
        let err = ActuatorError::Cancelled {
            channel: Channel::from(0),
            completed_steps: 1,
        };
        assert!(err.is_cancellation());
        assert!(!ActuatorError::Released.is_cancellation());
    }
}
