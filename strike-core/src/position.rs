//! Position model: logical angle to the surface's native control value
//!
//! ```text
//! pulse_width(a)  = MIN_PULSE + (MAX_PULSE - MIN_PULSE) * a / ANGLE_RANGE     [µs]
//! native_value(a) = round(pulse_width(a) / PERIOD_US * SCALE)
//! PERIOD_US       = 1_000_000 / PWM_FREQUENCY
//! ```
//!
//! With the defaults (50 Hz, 500-2500 µs, 180°, 16-bit scale) 0° maps to
//! 1638, 90° to 4915 and 180° to 8192.

use serde::{Deserialize, Serialize};

use crate::config::PwmConfig;
use crate::error::{CoreError, CoreResult};

/// Linear servo calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionModel {
    /// PWM frequency (Hz)
    pub frequency_hz: f64,
    /// Pulse width at 0° (µs)
    pub min_pulse_us: f64,
    /// Pulse width at `angle_range` (µs)
    pub max_pulse_us: f64,
    /// Mechanical range (degrees)
    pub angle_range: f64,
    /// Native full-scale value of the surface
    pub scale: u32,
}

impl Default for PositionModel {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            min_pulse_us: 500.0,
            max_pulse_us: 2500.0,
            angle_range: 180.0,
            scale: 65535,
        }
    }
}

impl PositionModel {
    /// Creates a validated model
    pub fn new(
        frequency_hz: f64,
        min_pulse_us: f64,
        max_pulse_us: f64,
        angle_range: f64,
        scale: u32,
    ) -> CoreResult<Self> {
        let model = Self {
            frequency_hz,
            min_pulse_us,
            max_pulse_us,
            angle_range,
            scale,
        };
        model.validate()?;
        Ok(model)
    }

    /// Builds the model from the `[pwm]` configuration section
    pub fn from_config(pwm: &PwmConfig) -> CoreResult<Self> {
        Self::new(
            pwm.frequency_hz,
            pwm.min_pulse_width_us,
            pwm.max_pulse_width_us,
            pwm.angle_range,
            pwm.scale,
        )
    }

    /// Same calibration, different native full scale
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    /// Checks the calibration constants
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "PWM frequency must be positive, got {}",
                self.frequency_hz
            )));
        }
        if !(self.min_pulse_us.is_finite() && self.max_pulse_us.is_finite())
            || self.min_pulse_us < 0.0
            || self.min_pulse_us >= self.max_pulse_us
        {
            return Err(CoreError::InvalidConfig(format!(
                "pulse widths must satisfy 0 <= min < max, got {}..{}µs",
                self.min_pulse_us, self.max_pulse_us
            )));
        }
        if self.max_pulse_us > self.period_us() {
            return Err(CoreError::InvalidConfig(format!(
                "max pulse width {}µs exceeds the PWM period {}µs",
                self.max_pulse_us,
                self.period_us()
            )));
        }
        if !(self.angle_range.is_finite() && self.angle_range > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "angle range must be positive, got {}",
                self.angle_range
            )));
        }
        if self.scale == 0 {
            return Err(CoreError::InvalidConfig("native scale must be non-zero".into()));
        }
        Ok(())
    }

    /// PWM period (µs)
    pub fn period_us(&self) -> f64 {
        1_000_000.0 / self.frequency_hz
    }

    /// Rejects angles outside `[0, angle_range]`
    pub fn check(&self, angle: f64) -> CoreResult<()> {
        if !angle.is_finite() || angle < 0.0 || angle > self.angle_range {
            return Err(CoreError::OutOfRange(format!(
                "angle must be 0-{}°, got {}°",
                self.angle_range, angle
            )));
        }
        Ok(())
    }

    /// Explicit clamping for callers that prefer it over an error
    pub fn clamp(&self, angle: f64) -> f64 {
        if angle.is_nan() {
            return 0.0;
        }
        angle.clamp(0.0, self.angle_range)
    }

    /// Pulse width (µs) for an angle
    pub fn pulse_width(&self, angle: f64) -> CoreResult<f64> {
        self.check(angle)?;
        Ok(self.min_pulse_us + (self.max_pulse_us - self.min_pulse_us) * angle / self.angle_range)
    }

    /// Native control value for an angle
    pub fn native_value(&self, angle: f64) -> CoreResult<u32> {
        let pulse = self.pulse_width(angle)?;
        Ok((pulse / self.period_us() * self.scale as f64).round() as u32)
    }

    /// Duty cycle as a percentage of the period
    pub fn duty_percent(&self, angle: f64) -> CoreResult<f64> {
        Ok(self.pulse_width(angle)? / self.period_us() * 100.0)
    }

    /// Inverse of [`pulse_width`](Self::pulse_width)
    pub fn angle_for_pulse(&self, pulse_us: f64) -> CoreResult<f64> {
        if !pulse_us.is_finite() || pulse_us < self.min_pulse_us || pulse_us > self.max_pulse_us {
            return Err(CoreError::OutOfRange(format!(
                "pulse width must be {}-{}µs, got {}µs",
                self.min_pulse_us, self.max_pulse_us, pulse_us
            )));
        }
        Ok((pulse_us - self.min_pulse_us) / (self.max_pulse_us - self.min_pulse_us) * self.angle_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_width_endpoints() {
        let model = PositionModel::default();
        assert_eq!(model.pulse_width(0.0).unwrap(), 500.0);
        assert_eq!(model.pulse_width(90.0).unwrap(), 1500.0);
        assert_eq!(model.pulse_width(180.0).unwrap(), 2500.0);
    }

    #[test]
    fn test_pulse_width_monotonic() {
        let model = PositionModel::default();
        let mut last = model.pulse_width(0.0).unwrap();
        for step in 1..=360 {
            let pulse = model.pulse_width(step as f64 * 0.5).unwrap();
            assert!(pulse >= last, "pulse width decreased at step {}", step);
            last = pulse;
        }
    }

    #[test]
    fn test_native_value_16bit() {
        let model = PositionModel::default();
        assert_eq!(model.native_value(0.0).unwrap(), 1638);
        assert_eq!(model.native_value(90.0).unwrap(), 4915);
        assert_eq!(model.native_value(180.0).unwrap(), 8192);
    }

    #[test]
    fn test_native_value_percentage_scale() {
        let model = PositionModel::default().with_scale(100);
        // 1000µs of a 20000µs period is 5%
        assert_eq!(model.native_value(45.0).unwrap(), 5);
    }

    #[test]
    fn test_native_value_nanosecond_scale() {
        let model = PositionModel::default().with_scale(20_000_000);
        assert_eq!(model.native_value(90.0).unwrap(), 1_500_000);
    }

    #[test]
    fn test_duty_percent_matches_bench_harness() {
        let model = PositionModel::default();
        assert!((model.duty_percent(0.0).unwrap() - 2.5).abs() < 1e-9);
        assert!((model.duty_percent(180.0).unwrap() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_is_error() {
        let model = PositionModel::default();
        assert!(model.pulse_width(-0.1).is_err());
        assert!(model.pulse_width(180.1).is_err());
        assert!(model.native_value(f64::NAN).is_err());
    }

    #[test]
    fn test_clamp() {
        let model = PositionModel::default();
        assert_eq!(model.clamp(-10.0), 0.0);
        assert_eq!(model.clamp(200.0), 180.0);
        assert_eq!(model.clamp(45.0), 45.0);
    }

    #[test]
    fn test_angle_for_pulse() {
        let model = PositionModel::default();
        assert!((model.angle_for_pulse(1000.0).unwrap() - 45.0).abs() < 1e-9);
        assert!(model.angle_for_pulse(2600.0).is_err());
    }

    #[test]
    fn test_invalid_calibration() {
        assert!(PositionModel::new(0.0, 500.0, 2500.0, 180.0, 65535).is_err());
        assert!(PositionModel::new(50.0, 2500.0, 500.0, 180.0, 65535).is_err());
        assert!(PositionModel::new(50.0, 500.0, 2500.0, 0.0, 65535).is_err());
        assert!(PositionModel::new(50.0, 500.0, 2500.0, 180.0, 0).is_err());
        // 2500µs does not fit in a 1ms period
        assert!(PositionModel::new(1000.0, 500.0, 2500.0, 180.0, 65535).is_err());
    }
}
