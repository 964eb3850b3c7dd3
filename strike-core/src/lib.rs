//! # 🎯 strike-core
//!
//! Pure building blocks of the trigger-to-actuation dispatch engine.
//!
//! ## Componentes
//!
//! - [`PositionModel`]: angle to pulse width to native control value
//! - [`ChannelMapper`]: MIDI note (or raw channel number) to [`Channel`]
//! - [`ModeState`]: alternate-sequence and calibration flags
//! - [`StrikeConfig`]: TOML file + environment configuration
//!
//! ## Example
//!
//! ```rust
//! use strike_core::{ChannelMapper, PositionModel, Trigger};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = PositionModel::default();
//! assert_eq!(model.native_value(90.0)?, 4915);
//!
//! let mapper = ChannelMapper::diatonic(60, 84, 16)?;
//! assert_eq!(mapper.resolve(Trigger::Note(64)).map(|c| c.index()), Some(2));
//! assert!(mapper.resolve(Trigger::Note(61)).is_none());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mapper;
pub mod mode;
pub mod position;
pub mod types;

pub use config::{
    AdmissionPolicy, MappingConfig, MotionConfig, PwmConfig, ShutdownMode, StrikeConfig,
};
pub use error::{CoreError, CoreResult};
pub use mapper::{note_name, ChannelMapper};
pub use mode::{ModeFlags, ModeState};
pub use position::PositionModel;
pub use types::{Channel, DispatchRequest, Trigger};
