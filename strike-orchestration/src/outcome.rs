//! Admission outcomes

use std::fmt;

use serde::{Deserialize, Serialize};
use strike_core::Trigger;

use crate::error::{DispatchError, DispatchResult, RejectReason};

/// Result of one admission check. Rejections are non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted,
    RejectedBusy,
    RejectedCalibration,
    RejectedUnmapped,
    RejectedShutdown,
}

impl DispatchOutcome {
    pub fn is_accepted(self) -> bool {
        self == DispatchOutcome::Accepted
    }

    /// Admission reason for busy / calibration / shutdown rejections
    pub fn reject_reason(self) -> Option<RejectReason> {
        match self {
            DispatchOutcome::RejectedBusy => Some(RejectReason::Busy),
            DispatchOutcome::RejectedCalibration => Some(RejectReason::Calibrating),
            DispatchOutcome::RejectedShutdown => Some(RejectReason::ShuttingDown),
            DispatchOutcome::Accepted | DispatchOutcome::RejectedUnmapped => None,
        }
    }

    /// Converts into the error taxonomy
    pub fn into_result(self, trigger: Trigger) -> DispatchResult<()> {
        match self {
            DispatchOutcome::Accepted => Ok(()),
            DispatchOutcome::RejectedUnmapped => Err(DispatchError::Unmapped(trigger)),
            other => Err(DispatchError::Rejected(
                other.reject_reason().unwrap_or(RejectReason::Busy),
            )),
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchOutcome::Accepted => "accepted",
            DispatchOutcome::RejectedBusy => "rejected_busy",
            DispatchOutcome::RejectedCalibration => "rejected_calibration",
            DispatchOutcome::RejectedUnmapped => "rejected_unmapped",
            DispatchOutcome::RejectedShutdown => "rejected_shutdown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(DispatchOutcome::RejectedBusy.reject_reason(), Some(RejectReason::Busy));
        assert_eq!(DispatchOutcome::Accepted.reject_reason(), None);
        assert_eq!(DispatchOutcome::RejectedUnmapped.reject_reason(), None);
    }

    #[test]
    fn test_into_result() {
        let trigger = Trigger::Note(61);
        assert!(DispatchOutcome::Accepted.into_result(trigger).is_ok());
        assert_eq!(
            DispatchOutcome::RejectedUnmapped.into_result(trigger),
            Err(DispatchError::Unmapped(trigger))
        );
        assert_eq!(
            DispatchOutcome::RejectedCalibration.into_result(trigger),
            Err(DispatchError::Rejected(RejectReason::Calibrating))
        );
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&DispatchOutcome::RejectedBusy).unwrap();
        assert_eq!(json, "\"rejected_busy\"");
        assert_eq!(DispatchOutcome::RejectedShutdown.to_string(), "rejected_shutdown");
    }
}
