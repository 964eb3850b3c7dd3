//! Movement sequences

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strike_core::{CoreError, MotionConfig, PositionModel};

use crate::error::ActuatorResult;

/// Move to `angle`, then hold for `hold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleStep {
    /// Degrees, within the position model's range
    pub angle: f64,
    pub hold: Duration,
}

impl AngleStep {
    pub fn new(angle: f64, hold: Duration) -> Self {
        Self { angle, hold }
    }
}

/// Ordered, immutable list of steps for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    steps: Vec<AngleStep>,
}

impl Sequence {
    pub fn new(steps: Vec<AngleStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[AngleStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all holds
    pub fn total_hold(&self) -> Duration {
        self.steps.iter().map(|s| s.hold).sum()
    }

    /// Checks every angle against a position model
    pub fn validate(&self, model: &PositionModel) -> ActuatorResult<()> {
        for step in &self.steps {
            model.check(step.angle)?;
        }
        Ok(())
    }
}

/// Recipe for the sequences a dispatcher builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceProfile {
    /// Rest position
    pub start_angle: f64,
    pub origin_angle: f64,
    /// Extra stop in the alternate mode
    pub target_angle: f64,
    pub hold: Duration,
    pub calibration_hold: Duration,
    /// Full mechanical range, swept by the reference sequence
    pub angle_range: f64,
}

impl SequenceProfile {
    /// Profile from the `[motion]` section, validated against the position model
    pub fn from_config(motion: &MotionConfig, model: &PositionModel) -> ActuatorResult<Self> {
        let profile = Self {
            start_angle: motion.start_angle,
            origin_angle: motion.origin_angle,
            target_angle: motion.target_angle,
            hold: motion.hold(),
            calibration_hold: motion.calibration_hold(),
            angle_range: model.angle_range,
        };
        for (name, angle) in [
            ("start", profile.start_angle),
            ("origin", profile.origin_angle),
            ("target", profile.target_angle),
        ] {
            model.check(angle).map_err(|e| {
                CoreError::InvalidConfig(format!("{} angle: {}", name, e))
            })?;
        }
        Ok(profile)
    }

    /// Origin, optional target, back to rest
    pub fn build(&self, use_alternate_sequence: bool) -> Sequence {
        let mut steps = Vec::with_capacity(3);
        steps.push(AngleStep::new(self.origin_angle, self.hold));
        if use_alternate_sequence {
            steps.push(AngleStep::new(self.target_angle, self.hold));
        }
        steps.push(AngleStep::new(self.start_angle, self.hold));
        Sequence::new(steps)
    }

    /// Calibration sweep: 0°, mid range, full range, then rest
    pub fn reference(&self) -> Sequence {
        Sequence::new(vec![
            AngleStep::new(0.0, self.calibration_hold),
            AngleStep::new(self.angle_range / 2.0, self.calibration_hold),
            AngleStep::new(self.angle_range, self.calibration_hold),
            AngleStep::new(self.start_angle, self.hold),
        ])
    }
}
