//! Actuation surfaces: where native control values end up

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use strike_core::Channel;
use tracing::{debug, info, trace, warn};

use crate::error::{ActuatorError, ActuatorResult};

/// Converts `(channel, native value)` pairs into electrical signals.
///
/// Implementations must accept concurrent calls for different channels.
pub trait ActuationSurface: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Number of addressable channels
    fn channel_count(&self) -> usize;

    /// Native full scale imposed by the hardware, if any
    fn full_scale(&self) -> Option<u32> {
        None
    }

    /// Writes one control value
    fn set_channel_value(&self, channel: Channel, native_value: u32) -> ActuatorResult<()>;

    /// Releases the hardware. Called once, at shutdown.
    fn release(&self) -> ActuatorResult<()> {
        Ok(())
    }

    /// Range check shared by implementations
    fn check_channel(&self, channel: Channel) -> ActuatorResult<()> {
        if channel.index() >= self.channel_count() {
            return Err(ActuatorError::ChannelOutOfRange {
                channel,
                count: self.channel_count(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SIMULATED SURFACE
// ═══════════════════════════════════════════════════════════════════════════

/// One recorded write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SurfaceWrite {
    pub channel: Channel,
    pub value: u32,
    #[serde(skip)]
    pub at: Instant,
}

#[derive(Debug, Default)]
struct SimulatedState {
    values: Vec<Option<u32>>,
    writes: Vec<SurfaceWrite>,
    /// Pending injected failures per channel index
    faults: HashMap<usize, u32>,
    releases: u32,
}

/// In-memory surface: records every write, supports fault injection
#[derive(Debug)]
pub struct SimulatedSurface {
    name: String,
    channel_count: usize,
    state: Mutex<SimulatedState>,
}

impl SimulatedSurface {
    pub fn new(channel_count: usize) -> Self {
        Self::named("simulated", channel_count)
    }

    pub fn named(name: &str, channel_count: usize) -> Self {
        Self {
            name: name.to_string(),
            channel_count,
            state: Mutex::new(SimulatedState {
                values: vec![None; channel_count],
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `times` writes on `channel` fail
    pub fn inject_fault(&self, channel: Channel, times: u32) {
        *self.state().faults.entry(channel.index()).or_insert(0) += times;
    }

    /// Last value written to a channel
    pub fn value(&self, channel: Channel) -> Option<u32> {
        self.state().values.get(channel.index()).copied().flatten()
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<SurfaceWrite> {
        self.state().writes.clone()
    }

    pub fn writes_for(&self, channel: Channel) -> Vec<SurfaceWrite> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.channel == channel)
            .copied()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    /// How many times `release` was called
    pub fn release_count(&self) -> u32 {
        self.state().releases
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }
}

impl ActuationSurface for SimulatedSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn set_channel_value(&self, channel: Channel, native_value: u32) -> ActuatorResult<()> {
        self.check_channel(channel)?;
        let mut state = self.state();

        if state.releases > 0 {
            return Err(ActuatorError::Released);
        }

        if let Some(remaining) = state.faults.get_mut(&channel.index()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ActuatorError::SurfaceWrite {
                    channel,
                    reason: "injected fault".into(),
                });
            }
        }

        state.values[channel.index()] = Some(native_value);
        state.writes.push(SurfaceWrite {
            channel,
            value: native_value,
            at: Instant::now(),
        });
        trace!(surface = %self.name, %channel, value = native_value, "write");
        Ok(())
    }

    fn release(&self) -> ActuatorResult<()> {
        let mut state = self.state();
        state.releases += 1;
        info!(surface = %self.name, writes = state.writes.len(), "surface released");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LINUX SYSFS PWM SURFACE
// ═══════════════════════════════════════════════════════════════════════════

/// Linux PWM class device (`/sys/class/pwm/pwmchipN`).
///
/// Native values are duty cycles in nanoseconds, so the full scale is the
/// period in nanoseconds.
#[derive(Debug)]
pub struct SysfsPwmSurface {
    name: String,
    chip: PathBuf,
    channel_count: usize,
    period_ns: u32,
    released: AtomicBool,
}

impl SysfsPwmSurface {
    /// Exports and enables `channel_count` outputs at `frequency_hz`
    pub fn open(chip: impl Into<PathBuf>, channel_count: usize, frequency_hz: f64) -> ActuatorResult<Self> {
        let chip = chip.into();
        if !chip.is_dir() {
            return Err(ActuatorError::NotInitialized(format!(
                "PWM chip {} not found",
                chip.display()
            )));
        }

        let available: usize = read_attr(&chip.join("npwm"))
            .map_err(|e| init_error(&chip, "npwm", e))?
            .parse()
            .map_err(|_| {
                ActuatorError::NotInitialized(format!("{}: unreadable npwm", chip.display()))
            })?;
        if channel_count > available {
            return Err(ActuatorError::NotInitialized(format!(
                "{} exposes {} channels, {} requested",
                chip.display(),
                available,
                channel_count
            )));
        }

        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(ActuatorError::NotInitialized(format!(
                "invalid PWM frequency {}",
                frequency_hz
            )));
        }
        let period = (1e9 / frequency_hz).round();
        if !(1.0..=f64::from(u32::MAX)).contains(&period) {
            return Err(ActuatorError::NotInitialized(format!(
                "PWM frequency {} Hz gives a period outside 1..={} ns",
                frequency_hz,
                u32::MAX
            )));
        }
        let period_ns = period as u32;

        let surface = Self {
            name: format!("sysfs:{}", chip.display()),
            chip,
            channel_count,
            period_ns,
            released: AtomicBool::new(false),
        };

        for index in 0..channel_count {
            if let Err(err) = surface.export(index) {
                // leave the chip as it was found
                for exported in (0..=index).rev() {
                    if let Err(e) = surface.unexport(exported) {
                        debug!(channel = exported, error = %e, "rollback unexport failed");
                    }
                }
                return Err(err);
            }
        }
        info!(surface = %surface.name, channels = channel_count, period_ns, "PWM chip ready");
        Ok(surface)
    }

    fn channel_dir(&self, index: usize) -> PathBuf {
        self.chip.join(format!("pwm{}", index))
    }

    fn export(&self, index: usize) -> ActuatorResult<()> {
        let dir = self.channel_dir(index);
        if !dir.is_dir() {
            write_attr(&self.chip.join("export"), &index.to_string())
                .map_err(|e| init_error(&self.chip, "export", e))?;
            debug!(channel = index, "exported");
        }
        write_attr(&dir.join("period"), &self.period_ns.to_string())
            .map_err(|e| init_error(&dir, "period", e))?;
        write_attr(&dir.join("enable"), "1").map_err(|e| init_error(&dir, "enable", e))?;
        Ok(())
    }

    /// Disables and unexports one output; both writes are attempted
    fn unexport(&self, index: usize) -> io::Result<()> {
        let disabled = write_attr(&self.channel_dir(index).join("enable"), "0");
        let unexported = write_attr(&self.chip.join("unexport"), &index.to_string());
        disabled.and(unexported)
    }

    pub fn period_ns(&self) -> u32 {
        self.period_ns
    }
}

impl ActuationSurface for SysfsPwmSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn full_scale(&self) -> Option<u32> {
        Some(self.period_ns)
    }

    fn set_channel_value(&self, channel: Channel, native_value: u32) -> ActuatorResult<()> {
        self.check_channel(channel)?;
        if self.released.load(Ordering::Acquire) {
            return Err(ActuatorError::Released);
        }
        let duty = native_value.min(self.period_ns);
        write_attr(
            &self.channel_dir(channel.index()).join("duty_cycle"),
            &duty.to_string(),
        )
        .map_err(|e| ActuatorError::SurfaceWrite {
            channel,
            reason: e.to_string(),
        })
    }

    fn release(&self) -> ActuatorResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for index in 0..self.channel_count {
            if let Err(e) = self.unexport(index) {
                warn!(channel = index, error = %e, "failed to release PWM channel");
                first_error.get_or_insert(ActuatorError::SurfaceWrite {
                    channel: Channel::from(index as u8),
                    reason: e.to_string(),
                });
            }
        }
        info!(surface = %self.name, "surface released");
        first_error.map_or(Ok(()), Err)
    }
}

fn read_attr(path: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value)
}

fn init_error(path: &Path, attr: &str, err: io::Error) -> ActuatorError {
    ActuatorError::NotInitialized(format!("{}/{}: {}", path.display(), attr, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_records_writes() {
        let surface = SimulatedSurface::new(4);
        surface.set_channel_value(Channel::from(1), 1638).unwrap();
        surface.set_channel_value(Channel::from(1), 4915).unwrap();

        assert_eq!(surface.value(Channel::from(1)), Some(4915));
        assert_eq!(surface.value(Channel::from(0)), None);
        let values: Vec<u32> = surface.writes_for(Channel::from(1)).iter().map(|w| w.value).collect();
        assert_eq!(values, vec![1638, 4915]);
    }

    #[test]
    fn test_simulated_rejects_out_of_range() {
        let surface = SimulatedSurface::new(4);
        let err = surface.set_channel_value(Channel::from(4), 0).unwrap_err();
        assert!(matches!(err, ActuatorError::ChannelOutOfRange { count: 4, .. }));
    }

    #[test]
    fn test_simulated_fault_injection() {
        let surface = SimulatedSurface::new(2);
        surface.inject_fault(Channel::from(0), 1);

        assert!(surface.set_channel_value(Channel::from(0), 1).is_err());
        assert!(surface.set_channel_value(Channel::from(1), 1).is_ok());
        assert!(surface.set_channel_value(Channel::from(0), 2).is_ok());
        assert_eq!(surface.write_count(), 2);
    }

    #[test]
    fn test_simulated_release() {
        let surface = SimulatedSurface::new(2);
        surface.release().unwrap();
        assert_eq!(surface.release_count(), 1);
        assert_eq!(
            surface.set_channel_value(Channel::from(0), 1),
            Err(ActuatorError::Released)
        );
    }

    fn fake_chip(npwm: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("npwm"), format!("{}\n", npwm)).unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for index in 0..npwm {
            fs::create_dir(dir.path().join(format!("pwm{}", index))).unwrap();
        }
        dir
    }

    #[test]
    fn test_sysfs_open_and_write() {
        let chip = fake_chip(4);
        let surface = SysfsPwmSurface::open(chip.path(), 2, 50.0).unwrap();

        assert_eq!(surface.full_scale(), Some(20_000_000));
        assert_eq!(read_attr(&chip.path().join("pwm0/period")).unwrap(), "20000000");
        assert_eq!(read_attr(&chip.path().join("pwm1/enable")).unwrap(), "1");

        surface.set_channel_value(Channel::from(1), 1_500_000).unwrap();
        assert_eq!(read_attr(&chip.path().join("pwm1/duty_cycle")).unwrap(), "1500000");

        assert!(surface.set_channel_value(Channel::from(2), 0).is_err());
    }

    #[test]
    fn test_sysfs_rejects_unrepresentable_period() {
        let chip = fake_chip(2);
        for hz in [0.1, 0.0, -50.0, f64::NAN, 1e12] {
            let err = SysfsPwmSurface::open(chip.path(), 2, hz).unwrap_err();
            assert!(matches!(err, ActuatorError::NotInitialized(_)), "{} Hz", hz);
        }
        // nothing was exported
        assert!(!chip.path().join("pwm0/period").exists());
    }

    #[test]
    fn test_sysfs_open_failure_unexports_earlier_channels() {
        let chip = fake_chip(3);
        fs::remove_dir(chip.path().join("pwm2")).unwrap();

        assert!(SysfsPwmSurface::open(chip.path(), 3, 50.0).is_err());
        assert_eq!(read_attr(&chip.path().join("pwm0/enable")).unwrap(), "0");
        assert_eq!(read_attr(&chip.path().join("pwm1/enable")).unwrap(), "0");
        // walked back from the failing channel down to the first
        assert_eq!(read_attr(&chip.path().join("unexport")).unwrap(), "0");
    }

    #[test]
    fn test_sysfs_release_once() {
        let chip = fake_chip(2);
        let surface = SysfsPwmSurface::open(chip.path(), 2, 50.0).unwrap();
        surface.release().unwrap();
        assert_eq!(read_attr(&chip.path().join("pwm0/enable")).unwrap(), "0");
        assert_eq!(
            surface.set_channel_value(Channel::from(0), 1),
            Err(ActuatorError::Released)
        );
        // second call is a no-op
        assert!(surface.release().is_ok());
    }

    #[test]
    fn test_sysfs_missing_chip() {
        let err = SysfsPwmSurface::open("/nonexistent/pwmchip9", 2, 50.0).unwrap_err();
        assert!(matches!(err, ActuatorError::NotInitialized(_)));
    }

    #[test]
    fn test_sysfs_not_enough_channels() {
        let chip = fake_chip(2);
        let err = SysfsPwmSurface::open(chip.path(), 16, 50.0).unwrap_err();
        assert!(err.to_string().contains("2 channels"));
    }
}
