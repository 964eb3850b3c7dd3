//! RAII admission tokens
//!
//! Everything a run holds is released by `Drop`, so a run that fails,
//! is cancelled or panics gives its tokens back on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedSemaphorePermit};

/// Exclusive claim on an `AtomicBool` (global busy flag or a channel claim)
#[derive(Debug)]
pub(crate) struct FlagGuard {
    flag: Arc<AtomicBool>,
}

impl FlagGuard {
    /// `None` when the flag is already held
    pub(crate) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Counts admitted work that has not finished yet
#[derive(Debug, Default)]
pub(crate) struct Activity {
    count: AtomicUsize,
    idle: Notify,
}

impl Activity {
    pub(crate) fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        ActiveGuard {
            activity: Arc::clone(self),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once the count reaches zero
    pub(crate) async fn wait_idle(&self) {
        loop {
            // registered before the check so a wakeup in between is not lost
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
pub(crate) struct ActiveGuard {
    activity: Arc<Activity>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.activity.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.activity.idle.notify_waiters();
        }
    }
}

/// Tokens held by one admitted run
#[derive(Debug)]
pub(crate) struct RunTokens {
    gate: OwnedRwLockReadGuard<()>,
    permit: Option<OwnedSemaphorePermit>,
    claim: Option<FlagGuard>,
    active: ActiveGuard,
}

impl RunTokens {
    pub(crate) fn new(
        gate: OwnedRwLockReadGuard<()>,
        permit: Option<OwnedSemaphorePermit>,
        claim: Option<FlagGuard>,
        active: ActiveGuard,
    ) -> Self {
        Self {
            gate,
            permit,
            claim,
            active,
        }
    }

    /// Gives back the gate, the permit and the claim, in that order. The
    /// returned guard keeps the run counted until its outcome is recorded.
    pub(crate) fn release(self) -> ActiveGuard {
        let RunTokens {
            gate,
            permit,
            claim,
            active,
        } = self;
        drop(gate);
        drop(permit);
        drop(claim);
        active
    }
}
