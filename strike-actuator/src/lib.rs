//! # 🦾 strike-actuator
//!
//! Actuation layer: turns movement sequences into writes on an
//! [`ActuationSurface`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  SequenceProfile ──build(mode)──▶ Sequence    │
//! │                                    │          │
//! │  Sequencer::run(channel, sequence) ▼          │
//! │   IDLE ─▶ MOVING ─┬─────────────▶ IDLE        │
//! │                   └─▶ FAILED ───▶ IDLE        │
//! │        per step: PositionModel::native_value  │
//! │                  surface.set_channel_value    │
//! │                  hold                         │
//! └──────────────────────────────────────────────┘
//!                    ↓
//!   SimulatedSurface | SysfsPwmSurface (/sys/class/pwm)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strike_actuator::{Sequencer, SequenceProfile, SimulatedSurface, StopSignal};
//! use strike_core::{Channel, MotionConfig, PositionModel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let surface = Arc::new(SimulatedSurface::new(16));
//! let model = PositionModel::default();
//! let mut motion = MotionConfig::default();
//! motion.hold_ms = 1;
//! let profile = SequenceProfile::from_config(&motion, &model)?;
//!
//! let sequencer = Sequencer::new(surface.clone(), model);
//! let report = sequencer
//!     .run(Channel::from(3), &profile.build(false), &mut StopSignal::never())
//!     .await?;
//! assert_eq!(report.writes, 2);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod sequence;
pub mod sequencer;
pub mod surface;

pub use error::{ActuatorError, ActuatorResult};
pub use sequence::{AngleStep, Sequence, SequenceProfile};
pub use sequencer::{RunReport, RunState, Sequencer, StopSignal};
pub use surface::{ActuationSurface, SimulatedSurface, SurfaceWrite, SysfsPwmSurface};
