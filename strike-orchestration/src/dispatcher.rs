//! Dispatcher: admission control, run supervision, calibration and shutdown

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use strike_actuator::{
    ActuationSurface, ActuatorError, ActuatorResult, RunReport, Sequence, SequenceProfile,
    Sequencer, StopSignal,
};
use strike_core::{
    AdmissionPolicy, Channel, ChannelMapper, CoreError, DispatchRequest, ModeState,
    PositionModel, ShutdownMode, StrikeConfig, Trigger, note_name,
};
use tokio::runtime::Handle;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{DispatchError, DispatchResult, RejectReason};
use crate::events::{DispatchEvent, EventBus};
use crate::outcome::DispatchOutcome;
use crate::stats::{DispatchStats, StatsSnapshot};
use crate::tokens::{ActiveGuard, Activity, FlagGuard, RunTokens};

// ═══════════════════════════════════════════════════════════════════════════════
// CALIBRATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one calibration sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalibrationReport {
    /// Channels that finished the reference sequence
    pub completed: Vec<Channel>,
    /// Channels whose surface rejected a write, with the error
    pub failures: Vec<(Channel, String)>,
    /// Interrupted by an abort shutdown
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl CalibrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Holds the calibration flag; clears it on drop
struct CalibrationBracket {
    mode: Arc<ModeState>,
    active: Option<ActiveGuard>,
}

impl CalibrationBracket {
    /// Clears the flag now, keeping the sweep counted as activity
    fn exit(mut self) -> Option<ActiveGuard> {
        self.active.take()
    }
}

impl Drop for CalibrationBracket {
    fn drop(&mut self) {
        self.mode.exit_calibration();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Queued run for a single-slot channel worker
struct SlotJob {
    sequence: Sequence,
    gate: OwnedRwLockReadGuard<()>,
    active: ActiveGuard,
}

struct Shared {
    policy: AdmissionPolicy,
    channels: usize,
    mapper: ChannelMapper,
    profile: SequenceProfile,
    sequencer: Arc<Sequencer>,
    mode: Arc<ModeState>,
    events: EventBus,
    stats: DispatchStats,
    /// Bounds concurrent runs under permit-pool and single-slot
    pool: Arc<Semaphore>,
    /// Global busy flag (global-busy policy)
    busy: Arc<AtomicBool>,
    /// Per-channel claims (permit-pool policy)
    claims: Vec<Arc<AtomicBool>>,
    /// Runs hold it shared; calibration holds it exclusively
    gate: Arc<RwLock<()>>,
    /// Worker inboxes (single-slot policy); emptied on shutdown
    slots: Mutex<Vec<mpsc::Sender<SlotJob>>>,
    /// `None` once shutdown has started joining
    tasks: Mutex<Option<JoinSet<()>>>,
    runtime: Handle,
    accepting: AtomicBool,
    stop: watch::Sender<bool>,
    activity: Arc<Activity>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn stop_signal(&self) -> StopSignal {
        StopSignal::from_receiver(self.stop.subscribe())
    }

    fn build_sequence(&self) -> Sequence {
        self.profile.build(self.mode.use_alternate_sequence())
    }

    fn record(&self, channel: Option<Channel>, trigger: Option<Trigger>, outcome: DispatchOutcome) {
        self.stats.record_outcome(outcome);
        let event = match (outcome, channel) {
            (DispatchOutcome::Accepted, Some(channel)) => DispatchEvent::Admitted {
                channel,
                trigger,
                policy: self.policy,
            },
            _ => DispatchEvent::Rejected {
                channel,
                trigger,
                outcome,
            },
        };
        self.events.emit(event);
    }

    /// Checks shared by every policy: accepting, not calibrating, gate open
    fn enter(&self) -> Result<OwnedRwLockReadGuard<()>, DispatchOutcome> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(DispatchOutcome::RejectedShutdown);
        }
        if self.mode.is_calibrating() {
            return Err(DispatchOutcome::RejectedCalibration);
        }
        let gate = Arc::clone(&self.gate)
            .try_read_owned()
            .map_err(|_| DispatchOutcome::RejectedCalibration)?;
        // calibration raises the flag before it waits for the gate
        if self.mode.is_calibrating() {
            return Err(DispatchOutcome::RejectedCalibration);
        }
        Ok(gate)
    }

    fn try_admit(&self, channel: Channel) -> Result<RunTokens, DispatchOutcome> {
        let gate = self.enter()?;
        match self.policy {
            AdmissionPolicy::GlobalBusy => {
                let busy =
                    FlagGuard::try_acquire(&self.busy).ok_or(DispatchOutcome::RejectedBusy)?;
                Ok(RunTokens::new(gate, None, Some(busy), self.activity.enter()))
            }
            _ => {
                let claim = FlagGuard::try_acquire(&self.claims[channel.index()])
                    .ok_or(DispatchOutcome::RejectedBusy)?;
                let permit = Arc::clone(&self.pool)
                    .try_acquire_owned()
                    .map_err(|_| DispatchOutcome::RejectedBusy)?;
                Ok(RunTokens::new(
                    gate,
                    Some(permit),
                    Some(claim),
                    self.activity.enter(),
                ))
            }
        }
    }

    fn admit(self: &Arc<Self>, channel: Channel, trigger: Option<Trigger>) -> DispatchOutcome {
        let outcome = match self.policy {
            AdmissionPolicy::SingleSlot => self.enqueue(channel),
            _ => match self.try_admit(channel) {
                Ok(tokens) => self.spawn_run(channel, tokens),
                Err(outcome) => outcome,
            },
        };
        self.record(Some(channel), trigger, outcome);
        outcome
    }

    fn enqueue(&self, channel: Channel) -> DispatchOutcome {
        let gate = match self.enter() {
            Ok(gate) => gate,
            Err(outcome) => return outcome,
        };
        let job = SlotJob {
            sequence: self.build_sequence(),
            gate,
            active: self.activity.enter(),
        };

        let slots = lock(&self.slots);
        let Some(slot) = slots.get(channel.index()) else {
            return DispatchOutcome::RejectedShutdown;
        };
        match slot.try_send(job) {
            Ok(()) => DispatchOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => DispatchOutcome::RejectedBusy,
            Err(mpsc::error::TrySendError::Closed(_)) => DispatchOutcome::RejectedShutdown,
        }
    }

    fn spawn_run(self: &Arc<Self>, channel: Channel, tokens: RunTokens) -> DispatchOutcome {
        let sequence = self.build_sequence();
        let mut tasks = lock(&self.tasks);
        let Some(set) = tasks.as_mut() else {
            return DispatchOutcome::RejectedShutdown;
        };

        let shared = Arc::clone(self);
        set.spawn_on(
            async move { shared.execute(channel, sequence, tokens).await },
            &self.runtime,
        );
        reap(set);
        DispatchOutcome::Accepted
    }

    async fn execute(&self, channel: Channel, sequence: Sequence, tokens: RunTokens) {
        let mut stop = self.stop_signal();
        let result = self.sequencer.run(channel, &sequence, &mut stop).await;
        let _active = tokens.release();
        self.finish(channel, result);
    }

    fn finish(&self, channel: Channel, result: ActuatorResult<RunReport>) {
        match result {
            Ok(report) => {
                self.stats.record_completed(report.elapsed);
                self.events.emit(DispatchEvent::Completed(report));
            }
            Err(ActuatorError::Cancelled {
                completed_steps, ..
            }) => {
                self.stats.record_cancelled();
                self.events.emit(DispatchEvent::Cancelled {
                    channel,
                    completed_steps,
                });
            }
            Err(err) => {
                self.stats.record_failed();
                self.events.emit(DispatchEvent::Failed {
                    channel,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Runs queued jobs for one channel, one at a time, until the inbox closes
    async fn slot_worker(&self, channel: Channel, mut inbox: mpsc::Receiver<SlotJob>) {
        while let Some(job) = inbox.recv().await {
            let SlotJob {
                sequence,
                gate,
                active,
            } = job;

            let aborted = *self.stop.borrow();
            if aborted {
                drop(gate);
                self.finish(
                    channel,
                    Err(ActuatorError::Cancelled {
                        channel,
                        completed_steps: 0,
                    }),
                );
                drop(active);
                continue;
            }

            let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
                break;
            };
            let tokens = RunTokens::new(gate, Some(permit), None, active);
            self.execute(channel, sequence, tokens).await;
        }
        debug!(%channel, "slot worker stopped");
    }

    fn begin_calibration(&self) -> DispatchResult<CalibrationBracket> {
        // counted before the accepting check so a concurrent shutdown waits for it
        let active = self.activity.enter();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected(RejectReason::ShuttingDown));
        }
        if let Err(err) = self.mode.enter_calibration() {
            self.events.emit(DispatchEvent::CalibrationRejected);
            return Err(err.into());
        }
        self.events.emit(DispatchEvent::CalibrationStarted);
        Ok(CalibrationBracket {
            mode: Arc::clone(&self.mode),
            active: Some(active),
        })
    }

    async fn run_calibration(&self, bracket: CalibrationBracket) -> CalibrationReport {
        let started = Instant::now();

        // waits for in-flight runs to drain
        let exclusive = Arc::clone(&self.gate).write_owned().await;
        debug!("calibration has exclusive access");

        let reference = self.profile.reference();
        let mut stop = self.stop_signal();
        let mut report = CalibrationReport::default();

        for channel in (0..self.channels).filter_map(|i| Channel::new(i, self.channels).ok()) {
            match self.sequencer.run(channel, &reference, &mut stop).await {
                Ok(_) => {
                    debug!(%channel, "channel calibrated");
                    report.completed.push(channel);
                }
                Err(err) if err.is_cancellation() => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    error!(%channel, error = %err, "calibration write failed");
                    report.failures.push((channel, err.to_string()));
                }
            }
        }

        report.elapsed = started.elapsed();
        drop(exclusive);
        self.stats.record_calibration();
        let _active = bracket.exit();
        self.events.emit(DispatchEvent::CalibrationFinished {
            completed: report.completed.len(),
            failed: report.failures.len(),
            cancelled: report.cancelled,
        });
        report
    }
}

/// Logs tasks that already finished with a panic
fn reap(set: &mut JoinSet<()>) {
    while let Some(result) = set.try_join_next() {
        if let Err(err) = result {
            if err.is_panic() {
                error!(error = %err, "dispatch task panicked");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission controller in front of the actuation sequencer.
///
/// Accept/reject decisions are synchronous and never block; accepted runs
/// execute as tokio tasks on the runtime the dispatcher was created on.
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.shared.policy)
            .field("channels", &self.shared.channels)
            .field("accepting", &self.is_accepting())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Dispatcher {
    /// Validates the configuration and wires the dispatcher to a surface.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &StrikeConfig, surface: Arc<dyn ActuationSurface>) -> DispatchResult<Self> {
        config.validate()?;
        if config.channels > surface.channel_count() {
            return Err(DispatchError::Config(CoreError::InvalidConfig(format!(
                "{} channels configured but surface '{}' has {}",
                config.channels,
                surface.name(),
                surface.channel_count()
            ))));
        }
        let runtime = Handle::try_current().map_err(|e| DispatchError::Runtime(e.to_string()))?;

        let mapper = ChannelMapper::from_config(&config.mapping, config.channels)?;
        let model = PositionModel::from_config(&config.pwm)?;
        let sequencer = Arc::new(Sequencer::new(surface, model));
        let profile = SequenceProfile::from_config(&config.motion, sequencer.model())?;
        let (stop, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            policy: config.policy,
            channels: config.channels,
            mapper,
            profile,
            sequencer,
            mode: Arc::new(ModeState::new()),
            events: EventBus::new(),
            stats: DispatchStats::new(),
            pool: Arc::new(Semaphore::new(config.effective_bound())),
            busy: Arc::new(AtomicBool::new(false)),
            claims: (0..config.channels)
                .map(|_| Arc::new(AtomicBool::new(false)))
                .collect(),
            gate: Arc::new(RwLock::new(())),
            slots: Mutex::new(Vec::new()),
            tasks: Mutex::new(Some(JoinSet::new())),
            runtime,
            accepting: AtomicBool::new(true),
            stop,
            activity: Arc::new(Activity::default()),
        });

        if config.policy == AdmissionPolicy::SingleSlot {
            let mut slots = lock(&shared.slots);
            let mut tasks = lock(&shared.tasks);
            if let Some(set) = tasks.as_mut() {
                for index in 0..config.channels {
                    let channel = Channel::new(index, config.channels)?;
                    let (tx, rx) = mpsc::channel(1);
                    let worker = Arc::clone(&shared);
                    set.spawn_on(
                        async move { worker.slot_worker(channel, rx).await },
                        &shared.runtime,
                    );
                    slots.push(tx);
                }
            }
        }

        info!(
            policy = %config.policy,
            bound = config.effective_bound(),
            channels = config.channels,
            mapped_notes = shared.mapper.len(),
            surface = shared.sequencer.surface().name(),
            "dispatcher ready"
        );
        Ok(Self { shared })
    }

    /// Admits a run on `channel`, or says why not. Never blocks.
    pub fn submit(&self, channel: Channel) -> DispatchOutcome {
        if channel.index() >= self.shared.channels {
            self.shared
                .record(Some(channel), None, DispatchOutcome::RejectedUnmapped);
            return DispatchOutcome::RejectedUnmapped;
        }
        self.shared.admit(channel, None)
    }

    /// Maps the request's trigger to a channel, then submits it
    pub fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let Some(channel) = self.shared.mapper.resolve(request.trigger) else {
            if let Trigger::Note(note) = request.trigger {
                debug!(note, name = %note_name(note), "no channel for note");
            }
            self.shared
                .record(None, Some(request.trigger), DispatchOutcome::RejectedUnmapped);
            return DispatchOutcome::RejectedUnmapped;
        };
        let outcome = self.shared.admit(channel, Some(request.trigger));
        debug!(
            trigger = %request.trigger,
            %outcome,
            latency = ?request.received_at.elapsed(),
            "admission decided"
        );
        outcome
    }

    /// Flips between the normal and the alternate sequence; returns the new
    /// setting. In-flight runs keep the sequence they started with.
    pub fn toggle_sequence_mode(&self) -> bool {
        let use_alternate_sequence = self.shared.mode.toggle_sequence_mode();
        self.shared.events.emit(DispatchEvent::ModeToggled {
            use_alternate_sequence,
        });
        use_alternate_sequence
    }

    /// The sequence the next admitted run would execute
    pub fn current_sequence(&self) -> Sequence {
        self.shared.build_sequence()
    }

    /// Runs the reference sequence on every channel, one after another.
    ///
    /// New submissions are rejected from the moment this is called until it
    /// returns. A second calibration fails with
    /// [`DispatchError::CalibrationActive`].
    /// A drain shutdown started meanwhile waits for the sweep to finish.
    pub async fn calibrate(&self) -> DispatchResult<CalibrationReport> {
        let bracket = self.shared.begin_calibration()?;
        Ok(self.shared.run_calibration(bracket).await)
    }

    /// Starts calibration in the background. The calibration flag is raised
    /// before this returns.
    pub fn spawn_calibration(&self) -> DispatchResult<()> {
        let bracket = self.shared.begin_calibration()?;
        let mut tasks = lock(&self.shared.tasks);
        let Some(set) = tasks.as_mut() else {
            return Err(DispatchError::Rejected(RejectReason::ShuttingDown));
        };
        let shared = Arc::clone(&self.shared);
        set.spawn_on(
            async move {
                shared.run_calibration(bracket).await;
            },
            &self.shared.runtime,
        );
        reap(set);
        Ok(())
    }

    /// Stops accepting work, waits for outstanding runs and calibrations and
    /// releases the surface. Under [`ShutdownMode::Abort`] holds are interrupted and runs
    /// end at the next step boundary.
    pub async fn shutdown(&self, mode: ShutdownMode) -> DispatchResult<StatsSnapshot> {
        if !self.shared.accepting.swap(false, Ordering::SeqCst) {
            return Err(DispatchError::Rejected(RejectReason::ShuttingDown));
        }
        info!(?mode, in_flight = self.in_flight(), "shutting down");

        if mode == ShutdownMode::Abort {
            self.shared.stop.send_replace(true);
        }
        // closing the inboxes lets single-slot workers exit once drained
        lock(&self.shared.slots).clear();

        let tasks = lock(&self.shared.tasks).take();
        let mut panicked = 0usize;
        if let Some(mut set) = tasks {
            while let Some(result) = set.join_next().await {
                if let Err(err) = result {
                    if err.is_panic() {
                        error!(error = %err, "dispatch task panicked");
                        panicked += 1;
                    }
                }
            }
        }
        // an inline `calibrate()` is not in the task set but is counted here
        self.shared.activity.wait_idle().await;

        self.shared.sequencer.release_surface()?;

        let stats = self.stats();
        info!(
            accepted = stats.accepted,
            rejected = stats.rejected(),
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            panicked,
            "dispatcher stopped"
        );
        Ok(stats)
    }

    /// Resolves once no admitted run or calibration is outstanding
    pub async fn wait_idle(&self) {
        self.shared.activity.wait_idle().await;
    }

    pub fn mode(&self) -> &ModeState {
        &self.shared.mode
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn mapper(&self) -> &ChannelMapper {
        &self.shared.mapper
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.shared.sequencer
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.shared.policy
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Admitted runs (queued or executing) plus a running calibration
    pub fn in_flight(&self) -> usize {
        self.shared.activity.count()
    }
}
