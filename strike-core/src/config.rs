//! Configuration loading
//!
//! Values come from three layers, later ones winning:
//!
//! 1. defaults ([`StrikeConfig::default`])
//! 2. an optional TOML file
//! 3. environment variables (a `.env` file is loaded once on first access)
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MAX_CONCURRENT_TASKS` | `max_concurrent_tasks` |
//! | `ADMISSION_POLICY` | `policy` (`global-busy`, `permit-pool`, `single-slot`) |
//! | `PWM_FREQUENCY` | `pwm.frequency_hz` |
//! | `MIN_PULSE_WIDTH` | `pwm.min_pulse_width_us` |
//! | `MAX_PULSE_WIDTH` | `pwm.max_pulse_width_us` |
//! | `ANGLE_RANGE` | `pwm.angle_range` |
//! | `ENABLE_MANUAL_INPUT` | `enable_manual_input` |

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::mapper::ChannelMapper;
use crate::position::PositionModel;
use crate::types::Channel;

static DOTENV_INIT: Lazy<()> = Lazy::new(|| {
    let _ = dotenv::dotenv();
});

#[inline]
fn ensure_loaded() {
    let _ = &*DOTENV_INIT;
}

/// How the dispatcher bounds concurrent movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    /// One sequence system-wide
    GlobalBusy,
    /// Up to `max_concurrent_tasks` sequences, one per channel, excess dropped
    #[default]
    PermitPool,
    /// One running and one queued request per channel
    SingleSlot,
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdmissionPolicy::GlobalBusy => "global-busy",
            AdmissionPolicy::PermitPool => "permit-pool",
            AdmissionPolicy::SingleSlot => "single-slot",
        })
    }
}

impl FromStr for AdmissionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "global-busy" => Ok(AdmissionPolicy::GlobalBusy),
            "permit-pool" => Ok(AdmissionPolicy::PermitPool),
            "single-slot" => Ok(AdmissionPolicy::SingleSlot),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown admission policy '{}'",
                other
            ))),
        }
    }
}

/// What happens to in-flight sequences on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownMode {
    /// Let every admitted sequence finish
    #[default]
    Drain,
    /// Interrupt at the next step boundary
    Abort,
}

impl FromStr for ShutdownMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(ShutdownMode::Drain),
            "abort" => Ok(ShutdownMode::Abort),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown shutdown mode '{}'",
                other
            ))),
        }
    }
}

/// `[pwm]` section: position model calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    pub frequency_hz: f64,
    pub min_pulse_width_us: f64,
    pub max_pulse_width_us: f64,
    pub angle_range: f64,
    /// Native full scale (65535 for a 16-bit duty register)
    pub scale: u32,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            min_pulse_width_us: 500.0,
            max_pulse_width_us: 2500.0,
            angle_range: 180.0,
            scale: 65535,
        }
    }
}

/// `[motion]` section: sequence shape and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Rest position every sequence returns to
    pub start_angle: f64,
    /// First position of every sequence
    pub origin_angle: f64,
    /// Extra position visited in the alternate sequence mode
    pub target_angle: f64,
    /// Hold after each step (ms)
    pub hold_ms: u64,
    /// Hold after each step of the calibration sweep (ms)
    pub calibration_hold_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            start_angle: 90.0,
            origin_angle: 60.0,
            target_angle: 45.0,
            hold_ms: 150,
            calibration_hold_ms: 1000,
        }
    }
}

impl MotionConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn calibration_hold(&self) -> Duration {
        Duration::from_millis(self.calibration_hold_ms)
    }
}

/// `[mapping]` section: note to channel table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Lowest note of the diatonic range (C4)
    pub low_note: u8,
    /// Highest note of the diatonic range (C6)
    pub high_note: u8,
    /// Explicit table; channel i plays `notes[i]`. Overrides the range.
    pub notes: Option<Vec<u8>>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            low_note: 60,
            high_note: 84,
            notes: None,
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrikeConfig {
    /// Size of the permit pool
    pub max_concurrent_tasks: usize,
    pub policy: AdmissionPolicy,
    /// Channels exposed by the actuation surface
    pub channels: usize,
    /// Read commands from stdin
    pub enable_manual_input: bool,
    pub shutdown: ShutdownMode,
    pub pwm: PwmConfig,
    pub motion: MotionConfig,
    pub mapping: MappingConfig,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            policy: AdmissionPolicy::default(),
            channels: 16,
            enable_manual_input: true,
            shutdown: ShutdownMode::default(),
            pwm: PwmConfig::default(),
            motion: MotionConfig::default(),
            mapping: MappingConfig::default(),
        }
    }
}

impl StrikeConfig {
    /// Parses a TOML document
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }

    /// Loads a TOML file
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults or file, then the process environment. Not validated: callers
    /// apply their own overrides first and then call [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlays the process environment
    pub fn apply_env(&mut self) -> CoreResult<()> {
        ensure_loaded();
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Overlays values from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = parse_var("MAX_CONCURRENT_TASKS", &v)?;
        }
        if let Some(v) = lookup("ADMISSION_POLICY") {
            self.policy = v.parse()?;
        }
        if let Some(v) = lookup("PWM_FREQUENCY") {
            self.pwm.frequency_hz = parse_var("PWM_FREQUENCY", &v)?;
        }
        if let Some(v) = lookup("MIN_PULSE_WIDTH") {
            self.pwm.min_pulse_width_us = parse_var("MIN_PULSE_WIDTH", &v)?;
        }
        if let Some(v) = lookup("MAX_PULSE_WIDTH") {
            self.pwm.max_pulse_width_us = parse_var("MAX_PULSE_WIDTH", &v)?;
        }
        if let Some(v) = lookup("ANGLE_RANGE") {
            self.pwm.angle_range = parse_var("ANGLE_RANGE", &v)?;
        }
        if let Some(v) = lookup("ENABLE_MANUAL_INPUT") {
            self.enable_manual_input = parse_bool("ENABLE_MANUAL_INPUT", &v)?;
        }
        Ok(())
    }

    /// Rejects configurations the dispatcher cannot honour
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(CoreError::InvalidConfig(
                "MAX_CONCURRENT_TASKS must be a positive integer".into(),
            ));
        }
        if self.channels == 0 || self.channels > Channel::MAX_COUNT {
            return Err(CoreError::InvalidConfig(format!(
                "channel count must be 1-{}, got {}",
                Channel::MAX_COUNT,
                self.channels
            )));
        }

        let model = PositionModel::from_config(&self.pwm)?;
        for (name, angle) in [
            ("start_angle", self.motion.start_angle),
            ("origin_angle", self.motion.origin_angle),
            ("target_angle", self.motion.target_angle),
        ] {
            model
                .check(angle)
                .map_err(|e| CoreError::InvalidConfig(format!("motion.{}: {}", name, e)))?;
        }

        ChannelMapper::from_config(&self.mapping, self.channels)?;
        Ok(())
    }

    /// Concurrency bound actually enforced under the configured policy
    pub fn effective_bound(&self) -> usize {
        match self.policy {
            AdmissionPolicy::GlobalBusy => 1,
            _ => self.max_concurrent_tasks,
        }
    }

    /// Serializes back to TOML
    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> CoreResult<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CoreError::InvalidConfig(format!("{}='{}': {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidConfig(format!(
            "{}='{}' is not a boolean",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = StrikeConfig::default();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.policy, AdmissionPolicy::PermitPool);
        assert!(config.enable_manual_input);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StrikeConfig::from_toml_str(
            r#"
            max_concurrent_tasks = 5
            policy = "single-slot"

            [pwm]
            frequency_hz = 60.0

            [motion]
            hold_ms = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.policy, AdmissionPolicy::SingleSlot);
        assert_eq!(config.pwm.frequency_hz, 60.0);
        assert_eq!(config.pwm.min_pulse_width_us, 500.0);
        assert_eq!(config.motion.hold(), Duration::from_millis(80));
        assert_eq!(config.motion.start_angle, 90.0);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = StrikeConfig::from_toml_str("policy = \"round-robin\"").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = StrikeConfig::from_file(Path::new("/nonexistent/strike.toml")).unwrap_err();
        assert!(matches!(err, CoreError::ConfigIo { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StrikeConfig::default();
        config
            .apply_overrides(lookup(&[
                ("MAX_CONCURRENT_TASKS", "7"),
                ("ADMISSION_POLICY", "global_busy"),
                ("PWM_FREQUENCY", "330"),
                ("MIN_PULSE_WIDTH", "600"),
                ("MAX_PULSE_WIDTH", "2400"),
                ("ANGLE_RANGE", "270"),
                ("ENABLE_MANUAL_INPUT", "off"),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrent_tasks, 7);
        assert_eq!(config.policy, AdmissionPolicy::GlobalBusy);
        assert_eq!(config.pwm.frequency_hz, 330.0);
        assert_eq!(config.pwm.min_pulse_width_us, 600.0);
        assert_eq!(config.pwm.max_pulse_width_us, 2400.0);
        assert_eq!(config.pwm.angle_range, 270.0);
        assert!(!config.enable_manual_input);
        assert_eq!(config.effective_bound(), 1);
    }

    #[test]
    fn test_env_override_garbage_is_error() {
        let mut config = StrikeConfig::default();
        let err = config
            .apply_overrides(lookup(&[("MAX_CONCURRENT_TASKS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_TASKS"));

        let err = config
            .apply_overrides(lookup(&[("ENABLE_MANUAL_INPUT", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_zero_tasks() {
        let config = StrikeConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_motion_outside_range() {
        let mut config = StrikeConfig::default();
        config.motion.target_angle = 200.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("target_angle"));
    }

    #[test]
    fn test_validate_rejects_mapping_wider_than_surface() {
        let config = StrikeConfig {
            channels: 8,
            ..Default::default()
        };
        // C4..C6 needs 15 channels
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_policy() {
        let config = StrikeConfig {
            policy: AdmissionPolicy::SingleSlot,
            shutdown: ShutdownMode::Abort,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("single-slot"));
        assert_eq!(StrikeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_policy_json_names() {
        let json = serde_json::to_string(&AdmissionPolicy::GlobalBusy).unwrap();
        assert_eq!(json, "\"global-busy\"");
        assert_eq!(AdmissionPolicy::PermitPool.to_string(), "permit-pool");
        assert_eq!("abort".parse::<ShutdownMode>().unwrap(), ShutdownMode::Abort);
    }
}
