//! # 🎭 strike-orchestration
//!
//! Dispatch engine: decides, without blocking, whether an incoming trigger
//! may start a movement run, supervises the runs it admits and brackets
//! calibration and shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                           │
//! │  DispatchRequest ─▶ ChannelMapper ─▶ admission               │
//! │     global-busy  │ AtomicBool CAS                            │
//! │     permit-pool  │ Semaphore::try_acquire_owned + claims     │
//! │     single-slot  │ per-channel worker, mpsc(1)               │
//! │                          │ RunTokens                         │
//! │                          ▼                                   │
//! │        JoinSet ─▶ Sequencer::run ─▶ ActuationSurface         │
//! │                                                              │
//! │  calibration gate (RwLock): runs shared, calibration excl.   │
//! │  EventBus (log + history + subscribers) │ DispatchStats      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strike_actuator::SimulatedSurface;
//! use strike_core::{DispatchRequest, ShutdownMode, StrikeConfig};
//! use strike_orchestration::{DispatchOutcome, Dispatcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = StrikeConfig::default();
//! config.motion.hold_ms = 1;
//!
//! let surface = Arc::new(SimulatedSurface::new(16));
//! let dispatcher = Dispatcher::new(&config, surface.clone())?;
//!
//! // F4 is the fourth white key above C4
//! assert_eq!(dispatcher.dispatch(DispatchRequest::note(65, 100)), DispatchOutcome::Accepted);
//! assert_eq!(dispatcher.dispatch(DispatchRequest::note(61, 100)), DispatchOutcome::RejectedUnmapped);
//!
//! let stats = dispatcher.shutdown(ShutdownMode::Drain).await?;
//! assert_eq!(stats.completed, 1);
//! assert_eq!(surface.write_count(), 2);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod outcome;
pub mod stats;
mod tokens;

pub use dispatcher::{CalibrationReport, Dispatcher};
pub use error::{DispatchError, DispatchResult, RejectReason};
pub use events::{DispatchEvent, EventBus, EventFilter, EventHandler};
pub use outcome::DispatchOutcome;
pub use stats::{DispatchStats, StatsSnapshot};
