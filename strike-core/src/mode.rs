//! Process-wide mode and calibration flags

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Consistent copy of the mode flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlags {
    /// Visit the target angle between origin and rest
    pub use_alternate_sequence: bool,
    /// Every dispatch is rejected while set
    pub calibration_in_progress: bool,
}

/// Read-mostly flags shared by the dispatcher and every run.
///
/// Writers (toggle, calibration entry and exit) are serialized by one mutex;
/// readers take a [`ModeFlags`] snapshot.
#[derive(Debug, Default)]
pub struct ModeState {
    flags: Mutex<ModeFlags>,
}

impl ModeState {
    /// Both flags cleared
    pub fn new() -> Self {
        Self::default()
    }

    // The flags are two plain bools: a poisoned lock still holds a valid value.
    fn flags(&self) -> MutexGuard<'_, ModeFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ModeFlags {
        *self.flags()
    }

    pub fn use_alternate_sequence(&self) -> bool {
        self.flags().use_alternate_sequence
    }

    pub fn is_calibrating(&self) -> bool {
        self.flags().calibration_in_progress
    }

    /// Flips the sequence mode and returns the new value
    pub fn toggle_sequence_mode(&self) -> bool {
        let mut flags = self.flags();
        flags.use_alternate_sequence = !flags.use_alternate_sequence;
        debug!(
            use_alternate_sequence = flags.use_alternate_sequence,
            "sequence mode toggled"
        );
        flags.use_alternate_sequence
    }

    /// Sets the calibration flag; fails if it is already set
    pub fn enter_calibration(&self) -> CoreResult<()> {
        let mut flags = self.flags();
        if flags.calibration_in_progress {
            debug!("calibration request rejected: already calibrating");
            return Err(CoreError::CalibrationActive);
        }
        flags.calibration_in_progress = true;
        info!("calibration entered");
        Ok(())
    }

    /// Clears the calibration flag; returns whether it was set
    pub fn exit_calibration(&self) -> bool {
        let mut flags = self.flags();
        let was_active = flags.calibration_in_progress;
        flags.calibration_in_progress = false;
        if was_active {
            info!("calibration exited");
        }
        was_active
    }
}
