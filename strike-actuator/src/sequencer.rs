//! Actuation sequencer: drives one channel through a [`Sequence`]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use strike_core::{Channel, PositionModel};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{ActuatorError, ActuatorResult};
use crate::sequence::Sequence;
use crate::surface::ActuationSurface;

/// Per-channel run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Moving = 1,
    /// Transient: a write failed, the run is unwinding
    Failed = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Moving,
            2 => RunState::Failed,
            _ => RunState::Idle,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Moving => "moving",
            RunState::Failed => "failed",
        })
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub channel: Channel,
    /// Surface writes performed
    pub writes: usize,
    pub elapsed: Duration,
}

/// Shutdown signal observed between steps and during holds
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// A signal that is never raised
    pub fn never() -> Self {
        Self::default()
    }

    /// Raised when the sender publishes `true`
    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn is_raised(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleeps for `duration`; returns `true` if interrupted by the signal
    pub async fn hold(&mut self, duration: Duration) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            tokio::time::sleep(duration).await;
            return false;
        };
        if *rx.borrow_and_update() {
            return true;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = rx.changed() => match changed {
                    Ok(()) => {
                        if *rx.borrow_and_update() {
                            return true;
                        }
                    }
                    // sender gone: nobody can raise the signal any more
                    Err(_) => {
                        (&mut sleep).await;
                        return false;
                    }
                },
            }
        }
    }
}

/// Resets the channel to `Idle` however the run ends, including when the
/// run's future is dropped mid-hold.
struct StateGuard<'a> {
    slot: &'a AtomicU8,
}

impl<'a> StateGuard<'a> {
    fn enter(slot: &'a AtomicU8) -> Self {
        slot.store(RunState::Moving as u8, Ordering::Release);
        Self { slot }
    }

    fn fail(&self) {
        self.slot.store(RunState::Failed as u8, Ordering::Release);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.slot.store(RunState::Idle as u8, Ordering::Release);
    }
}

/// Writes sequences to the actuation surface. Owns no admission policy:
/// callers guarantee a channel is never driven by two runs at once.
pub struct Sequencer {
    surface: Arc<dyn ActuationSurface>,
    model: PositionModel,
    states: Vec<AtomicU8>,
    released: AtomicBool,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("surface", &self.surface.name())
            .field("model", &self.model)
            .field("channels", &self.states.len())
            .finish()
    }
}

impl Sequencer {
    /// A surface announcing its own full scale overrides the model's
    pub fn new(surface: Arc<dyn ActuationSurface>, model: PositionModel) -> Self {
        let model = match surface.full_scale() {
            Some(scale) => model.with_scale(scale),
            None => model,
        };
        let states = (0..surface.channel_count())
            .map(|_| AtomicU8::new(RunState::Idle as u8))
            .collect();
        Self {
            surface,
            model,
            states,
            released: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &PositionModel {
        &self.model
    }

    pub fn surface(&self) -> &Arc<dyn ActuationSurface> {
        &self.surface
    }

    pub fn channel_count(&self) -> usize {
        self.states.len()
    }

    /// Current state of a channel (`Idle` for unknown channels)
    pub fn state(&self, channel: Channel) -> RunState {
        self.states
            .get(channel.index())
            .map(|s| RunState::from_u8(s.load(Ordering::Acquire)))
            .unwrap_or(RunState::Idle)
    }

    /// Channels currently moving
    pub fn active_runs(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.load(Ordering::Acquire) != RunState::Idle as u8)
            .count()
    }

    /// Drives `channel` through `sequence`: for each step, write the native
    /// value and hold. A failed write ends the run with the surface error.
    pub async fn run(
        &self,
        channel: Channel,
        sequence: &Sequence,
        stop: &mut StopSignal,
    ) -> ActuatorResult<RunReport> {
        let slot = self
            .states
            .get(channel.index())
            .ok_or(ActuatorError::ChannelOutOfRange {
                channel,
                count: self.states.len(),
            })?;

        let guard = StateGuard::enter(slot);
        let started = Instant::now();
        debug!(%channel, steps = sequence.len(), "run started");

        match self.drive(channel, sequence, stop).await {
            Ok(writes) => {
                let report = RunReport {
                    channel,
                    writes,
                    elapsed: started.elapsed(),
                };
                debug!(%channel, writes, elapsed_ms = report.elapsed.as_millis() as u64, "run finished");
                Ok(report)
            }
            Err(err) if err.is_cancellation() => {
                debug!(%channel, "run cancelled");
                Err(err)
            }
            Err(err) => {
                guard.fail();
                warn!(%channel, error = %err, "run failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        channel: Channel,
        sequence: &Sequence,
        stop: &mut StopSignal,
    ) -> ActuatorResult<usize> {
        let mut writes = 0;
        for (index, step) in sequence.steps().iter().enumerate() {
            if stop.is_raised() {
                return Err(ActuatorError::Cancelled {
                    channel,
                    completed_steps: index,
                });
            }

            let value = self.model.native_value(step.angle)?;
            self.surface.set_channel_value(channel, value)?;
            writes += 1;
            trace!(%channel, step = index, angle = step.angle, value, "step written");

            if stop.hold(step.hold).await {
                return Err(ActuatorError::Cancelled {
                    channel,
                    completed_steps: index + 1,
                });
            }
        }
        Ok(writes)
    }

    /// Releases the surface; only the first call reaches the hardware
    pub fn release_surface(&self) -> ActuatorResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.surface.release()
    }
}
