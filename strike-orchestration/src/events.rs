//! Dispatch diagnostics: every outcome is logged, kept in a bounded history
//! and handed to subscribers

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use strike_actuator::RunReport;
use strike_core::{AdmissionPolicy, Channel, Trigger};
use tracing::{debug, info, warn};

use crate::outcome::DispatchOutcome;

/// Something the dispatcher did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Admitted {
        channel: Channel,
        trigger: Option<Trigger>,
        policy: AdmissionPolicy,
    },
    Rejected {
        channel: Option<Channel>,
        trigger: Option<Trigger>,
        outcome: DispatchOutcome,
    },
    Completed(RunReport),
    Failed {
        channel: Channel,
        error: String,
    },
    Cancelled {
        channel: Channel,
        completed_steps: usize,
    },
    ModeToggled {
        use_alternate_sequence: bool,
    },
    CalibrationStarted,
    CalibrationRejected,
    CalibrationFinished {
        completed: usize,
        failed: usize,
        cancelled: bool,
    },
}

impl DispatchEvent {
    /// Channel the event concerns, if any
    pub fn channel(&self) -> Option<Channel> {
        match self {
            DispatchEvent::Admitted { channel, .. }
            | DispatchEvent::Failed { channel, .. }
            | DispatchEvent::Cancelled { channel, .. } => Some(*channel),
            DispatchEvent::Rejected { channel, .. } => *channel,
            DispatchEvent::Completed(report) => Some(report.channel),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchEvent::Rejected { .. } | DispatchEvent::CalibrationRejected
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchEvent::Failed { .. })
    }

    pub fn is_calibration(&self) -> bool {
        matches!(
            self,
            DispatchEvent::CalibrationStarted
                | DispatchEvent::CalibrationRejected
                | DispatchEvent::CalibrationFinished { .. }
        )
    }

    fn log(&self) {
        match self {
            DispatchEvent::Admitted {
                channel,
                trigger,
                policy,
            } => info!(%channel, ?trigger, %policy, outcome = "accepted", "dispatch accepted"),
            DispatchEvent::Rejected {
                channel,
                trigger,
                outcome,
            } => info!(?channel, ?trigger, %outcome, "dispatch rejected"),
            DispatchEvent::Completed(report) => info!(
                channel = %report.channel,
                writes = report.writes,
                elapsed_ms = report.elapsed.as_millis() as u64,
                outcome = "completed",
                "run completed"
            ),
            DispatchEvent::Failed { channel, error } => {
                warn!(%channel, reason = %error, outcome = "failed", "run failed")
            }
            DispatchEvent::Cancelled {
                channel,
                completed_steps,
            } => info!(%channel, completed_steps, outcome = "cancelled", "run cancelled"),
            DispatchEvent::ModeToggled {
                use_alternate_sequence,
            } => info!(use_alternate_sequence, "sequence mode changed"),
            DispatchEvent::CalibrationStarted => info!("calibration started"),
            DispatchEvent::CalibrationRejected => {
                info!(reason = "calibration in progress", "calibration rejected")
            }
            DispatchEvent::CalibrationFinished {
                completed,
                failed,
                cancelled,
            } => info!(completed, failed, cancelled, "calibration finished"),
        }
    }
}

/// Subscriber callback
pub type EventHandler = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

/// Selects which events a handler receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    Channel(Channel),
    Rejections,
    Failures,
    Calibration,
}

impl EventFilter {
    pub fn matches(&self, event: &DispatchEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Channel(channel) => event.channel() == Some(*channel),
            EventFilter::Rejections => event.is_rejection(),
            EventFilter::Failures => event.is_failure(),
            EventFilter::Calibration => event.is_calibration(),
        }
    }
}

/// Diagnostics collaborator.
///
/// Handlers run synchronously inside [`emit`](Self::emit), which is called on
/// the admission path: they must return quickly without blocking. Long work
/// belongs on a channel or task the handler feeds.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<EventFilter, Vec<EventHandler>>>>,
    history: Arc<Mutex<VecDeque<DispatchEvent>>>,
    max_history: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_history", &self.max_history)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(1000)
    }

    /// Keeps the last `max_history` events
    pub fn with_history(max_history: usize) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(max_history.min(1024)))),
            max_history,
        }
    }

    pub fn subscribe<F>(&self, filter: EventFilter, handler: F)
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        lock(&self.handlers)
            .entry(filter)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn unsubscribe(&self, filter: &EventFilter) {
        lock(&self.handlers).remove(filter);
    }

    /// Logs, records and fans out an event. Never fails: diagnostics must not
    /// interfere with dispatch.
    pub fn emit(&self, event: DispatchEvent) {
        event.log();

        if self.max_history > 0 {
            let mut history = lock(&self.history);
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // handlers are called without the lock held
        let matching: Vec<EventHandler> = lock(&self.handlers)
            .iter()
            .filter(|(filter, _)| filter.matches(&event))
            .flat_map(|(_, list)| list.iter().cloned())
            .collect();
        for handler in &matching {
            handler(&event);
        }
        debug!(subscribers = matching.len(), "event delivered");
    }

    /// Oldest first
    pub fn history(&self) -> Vec<DispatchEvent> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Recorded events matching a filter
    pub fn history_matching(&self, filter: &EventFilter) -> Vec<DispatchEvent> {
        lock(&self.history)
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }
}

// Handlers and history stay usable after a panicking subscriber.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
