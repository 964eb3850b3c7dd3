//! Dispatch counters and run timings

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::outcome::DispatchOutcome;

#[derive(Debug, Default)]
struct RunTimings {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

/// Counters updated from the admission path and from every run
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    rejected_busy: AtomicU64,
    rejected_calibration: AtomicU64,
    rejected_unmapped: AtomicU64,
    rejected_shutdown: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    calibrations: AtomicU64,
    timings: Mutex<RunTimings>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Accepted => &self.accepted,
            DispatchOutcome::RejectedBusy => &self.rejected_busy,
            DispatchOutcome::RejectedCalibration => &self.rejected_calibration,
            DispatchOutcome::RejectedUnmapped => &self.rejected_unmapped,
            DispatchOutcome::RejectedShutdown => &self.rejected_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the duration of a finished run
    pub fn record_completed(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);

        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        timings.count += 1;
        timings.total += elapsed;
        if timings.min.is_none_or(|min| elapsed < min) {
            timings.min = Some(elapsed);
        }
        if timings.max.is_none_or(|max| elapsed > max) {
            timings.max = Some(elapsed);
        }
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_calibration(&self) {
        self.calibrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        let avg_run = if timings.count > 0 {
            timings.total / timings.count as u32
        } else {
            Duration::ZERO
        };

        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            rejected_calibration: self.rejected_calibration.load(Ordering::Relaxed),
            rejected_unmapped: self.rejected_unmapped.load(Ordering::Relaxed),
            rejected_shutdown: self.rejected_shutdown.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            calibrations: self.calibrations.load(Ordering::Relaxed),
            min_run: timings.min.unwrap_or(Duration::ZERO),
            avg_run,
            max_run: timings.max.unwrap_or(Duration::ZERO),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected_busy: u64,
    pub rejected_calibration: u64,
    pub rejected_unmapped: u64,
    pub rejected_shutdown: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub calibrations: u64,
    pub min_run: Duration,
    pub avg_run: Duration,
    pub max_run: Duration,
}

impl StatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.rejected_busy + self.rejected_calibration + self.rejected_unmapped + self.rejected_shutdown
    }

    /// Accepted runs that have not finished yet
    pub fn pending(&self) -> u64 {
        self.accepted
            .saturating_sub(self.completed + self.failed + self.cancelled)
    }
}
