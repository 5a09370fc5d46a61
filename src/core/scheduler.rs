//! The scheduler loop.
//!
//! One [`Scheduler`] owns every decision about who drives the input device.
//! Each [`Scheduler::tick`] runs four phases in a fixed order:
//!
//! 1. drain and apply control commands (an emergency stop wins outright),
//! 2. evaluate host health and run a recovery if one is needed,
//! 3. evaluate exception watchers and handle the most urgent match,
//! 4. run one step of the running task, or start the next due one.
//!
//! At most one unit of work runs per tick. Every unit is executed while the
//! arbitration lock is held and is raced against the watchdog, emergency
//! stops and shutdown; whichever finishes first decides the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_decision_event, AuditSink, DecisionKind};
use crate::core::executor::{
    CommandExtension, InputActuator, InputHandle, Pattern, PatternDetector, ProbeEvidence,
    RecoveryAction, Region, StatusProbe, StepOutcome,
};
use crate::core::health::{HealthMonitor, HostStatus, RecoveryKind, Transition};
use crate::core::lock::{ArbitrationLock, LockOwner};
use crate::core::task::{FailureVerdict, TaskId, TaskRegistry, TaskSnapshot};
use crate::core::watcher::{WatcherId, WatcherSnapshot, Watchlist};
use crate::core::{AppResult, EngineError};
use crate::infra::inbox::{
    CommandInbox, CommandKind, CommandSender, ControlCommand, DrainedBatch, EmergencySignal,
};
use crate::util::clock::{duration_ms, Clock};

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Sleep between ticks.
    pub tick_interval: Duration,
    /// Upper bound on one unit of work, lock acquisition included.
    pub watchdog: Duration,
    /// Upper bound on one status probe or pattern detection.
    pub probe_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            watchdog: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// External collaborators the loop drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Host lifecycle evidence.
    pub probe: Arc<dyn StatusProbe>,
    /// Screen pattern detection.
    pub detector: Arc<dyn PatternDetector>,
    /// The input device.
    pub actuator: Arc<dyn InputActuator>,
    /// Host restart logic.
    pub recovery: Arc<dyn RecoveryAction>,
    /// Handler for custom and unresolved position commands.
    pub extension: Option<Arc<dyn CommandExtension>>,
}

/// The three independent pause switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseFlags {
    /// Everything but command draining is suspended.
    pub global: bool,
    /// No task selection.
    pub scheduler: bool,
    /// No watcher evaluation.
    pub detection: bool,
}

/// What a tick ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// An emergency stop was applied.
    EmergencyStopped,
    /// Global pause is in force.
    Paused,
    /// A recovery ran; after a success the loop ticks again without sleeping.
    Recovery {
        /// Which recovery.
        kind: RecoveryKind,
        /// The action reported success.
        succeeded: bool,
    },
    /// The host is not operational and no recovery applies.
    HostUnavailable(HostStatus),
    /// A watcher's handler ran (or was attempted).
    Watcher(WatcherId),
    /// A task step ran (or was attempted).
    Task {
        /// Task identifier.
        id: TaskId,
        /// Step index that ran.
        step: u32,
    },
    /// Nothing to do.
    Idle,
}

/// Everything a remote status report needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Ticks completed.
    pub tick: u64,
    /// Engine clock at publication.
    pub timestamp_ms: u64,
    /// Current host status.
    pub host_status: HostStatus,
    /// Pause switches.
    pub pause: PauseFlags,
    /// Current holder of the arbitration lock.
    pub lock_holder: Option<LockOwner>,
    /// Task between steps, if any.
    pub running_task: Option<TaskId>,
    /// Recoveries in a row.
    pub recovery_streak: u32,
    /// Per-task status.
    pub tasks: Vec<TaskSnapshot>,
    /// Per-watcher status.
    pub watchers: Vec<WatcherSnapshot>,
}

/// State owned by the loop, wired explicitly at construction.
pub struct SchedulerParts {
    /// Registered tasks.
    pub tasks: TaskRegistry,
    /// Registered watchers.
    pub watchers: Watchlist,
    /// Host state machine.
    pub health: HealthMonitor,
    /// Control command queue.
    pub inbox: CommandInbox,
    /// Input arbitration.
    pub lock: Arc<ArbitrationLock>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Decision sink.
    pub audit: Box<dyn AuditSink>,
}

enum UnitEnd<T> {
    Finished(AppResult<T>),
    TimedOut,
    Cancelled(&'static str),
}

/// Race a unit of work against the watchdog, emergency stops and shutdown.
async fn race_unit<T, F>(
    unit: F,
    watchdog: Duration,
    emergency: &mut EmergencySignal,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> UnitEnd<T>
where
    F: Future<Output = AppResult<T>>,
{
    let stop_requested = async move {
        match shutdown {
            Some(rx) => {
                let _ = rx.wait_for(|stop| *stop).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        () = emergency.raised() => UnitEnd::Cancelled("emergency stop"),
        () = stop_requested => UnitEnd::Cancelled("shutdown"),
        res = tokio::time::timeout(watchdog, unit) => {
            res.map_or(UnitEnd::TimedOut, UnitEnd::Finished)
        }
    }
}

fn err_text(err: EngineError) -> String {
    err.to_string()
}

/// The arbitration loop.
pub struct Scheduler {
    settings: SchedulerSettings,
    tasks: TaskRegistry,
    watchers: Watchlist,
    health: HealthMonitor,
    inbox: CommandInbox,
    emergency: EmergencySignal,
    lock: Arc<ArbitrationLock>,
    collab: Collaborators,
    clock: Arc<dyn Clock>,
    audit: Box<dyn AuditSink>,
    pause: PauseFlags,
    force_refresh: bool,
    tick_count: u64,
    shutdown: Option<watch::Receiver<bool>>,
    status_tx: watch::Sender<EngineStatus>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick_count", &self.tick_count)
            .field("pause", &self.pause)
            .field("host_status", &self.health.status())
            .field("tasks", &self.tasks.len())
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Wire a scheduler from its parts.
    pub fn new(
        settings: SchedulerSettings,
        parts: SchedulerParts,
        collaborators: Collaborators,
    ) -> Self {
        let SchedulerParts {
            tasks,
            watchers,
            health,
            inbox,
            lock,
            clock,
            audit,
        } = parts;
        let emergency = inbox.emergency_signal();
        let initial = EngineStatus {
            tick: 0,
            timestamp_ms: clock.now_ms(),
            host_status: health.status(),
            pause: PauseFlags::default(),
            lock_holder: None,
            running_task: None,
            recovery_streak: 0,
            tasks: tasks.snapshots(),
            watchers: watchers.snapshots(),
        };
        let (status_tx, _) = watch::channel(initial);
        Self {
            settings,
            tasks,
            watchers,
            health,
            inbox,
            emergency,
            lock,
            collab: collaborators,
            clock,
            audit,
            pause: PauseFlags::default(),
            force_refresh: false,
            tick_count: 0,
            shutdown: None,
            status_tx,
        }
    }

    /// Loop timing in force.
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Producer handle for control commands.
    pub fn sender(&self) -> CommandSender {
        self.inbox.sender()
    }

    /// Registered tasks.
    pub const fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Registered watchers.
    pub const fn watchers(&self) -> &Watchlist {
        &self.watchers
    }

    /// Host state machine.
    pub const fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// The arbitration lock.
    pub fn lock(&self) -> Arc<ArbitrationLock> {
        Arc::clone(&self.lock)
    }

    /// Current pause switches.
    pub const fn pause_flags(&self) -> PauseFlags {
        self.pause
    }

    /// Ticks completed.
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Receive a fresh [`EngineStatus`] after every tick.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Build a status snapshot now.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            tick: self.tick_count,
            timestamp_ms: self.clock.now_ms(),
            host_status: self.health.status(),
            pause: self.pause,
            lock_holder: self.lock.holder(),
            running_task: self.tasks.running().map(|t| t.id().to_string()),
            recovery_streak: self.health.recovery_streak(),
            tasks: self.tasks.snapshots(),
            watchers: self.watchers.snapshots(),
        }
    }

    /// Run ticks until `shutdown` turns true or its sender is dropped.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) {
        self.shutdown = Some(shutdown.clone());
        let mut shutdown = shutdown;
        info!(
            tick_interval_ms = duration_ms(self.settings.tick_interval),
            watchdog_ms = duration_ms(self.settings.watchdog),
            "scheduler loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.tick().await;
            // A fresh launch is probed again straight away.
            if matches!(outcome, TickOutcome::Recovery { succeeded: true, .. }) {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.settings.tick_interval) => {}
            }
        }

        if let Some(id) = self.tasks.preempt_running() {
            self.record(DecisionKind::UnitCancelled, id, Some("shutdown".into()));
        }
        self.publish();
        self.shutdown = None;
        info!(ticks = self.tick_count, "scheduler loop stopped");
    }

    /// Execute one iteration of the loop.
    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_count += 1;
        let outcome = self.tick_phases().await;
        debug!(tick = self.tick_count, outcome = ?outcome, "tick finished");
        self.publish();
        outcome
    }

    async fn tick_phases(&mut self) -> TickOutcome {
        if self.apply_commands().await {
            return TickOutcome::EmergencyStopped;
        }
        if self.pause.global {
            return TickOutcome::Paused;
        }

        let now = self.clock.now_ms();
        let verdict = if self.health.is_check_due(now) {
            let evidence = self.probe().await;
            self.health.observe(evidence, now)
        } else {
            self.health.standing_verdict(now)
        };
        if let Some(t) = verdict.transition {
            self.record_transition(&t);
        }
        if let Some(kind) = verdict.recovery {
            return self.recover(kind).await;
        }
        if !verdict.status.is_operational() {
            return TickOutcome::HostUnavailable(verdict.status);
        }

        if !self.pause.detection || self.force_refresh {
            let forced = std::mem::take(&mut self.force_refresh);
            if let Some(outcome) = self.evaluate_watchers(forced).await {
                return outcome;
            }
        }

        if self.pause.scheduler {
            return TickOutcome::Idle;
        }
        self.step_task().await
    }

    async fn probe(&self) -> Option<ProbeEvidence> {
        let probe = Arc::clone(&self.collab.probe);
        if let Ok(evidence) = tokio::time::timeout(self.settings.probe_timeout, probe.probe()).await {
            Some(evidence)
        } else {
            warn!(
                timeout_ms = duration_ms(self.settings.probe_timeout),
                "status probe timed out"
            );
            None
        }
    }

    // Phase 1. Returns true when an emergency stop was applied.
    async fn apply_commands(&mut self) -> bool {
        self.emergency.acknowledge();
        let mut batch = self.inbox.drain_batch();
        loop {
            match batch {
                DrainedBatch::Empty => return false,
                DrainedBatch::Emergency { stop, discarded } => {
                    self.emergency_stop(&stop, discarded);
                    return true;
                }
                DrainedBatch::Ordered(commands) => {
                    let mut pending = commands.into_iter();
                    let mut interrupted = false;
                    for command in pending.by_ref() {
                        if self.apply_command(command).await {
                            interrupted = true;
                            break;
                        }
                    }
                    if !interrupted {
                        return false;
                    }
                    // A stop arrived mid-command; it is already queued.
                    for command in pending {
                        self.record(
                            DecisionKind::CommandDiscarded,
                            command.label(),
                            Some("emergency stop raised".into()),
                        );
                    }
                    self.emergency.acknowledge();
                    batch = self.inbox.drain_batch();
                }
            }
        }
    }

    fn emergency_stop(&mut self, stop: &ControlCommand, discarded: Vec<ControlCommand>) {
        let evicted = self.lock.force_release();
        if let Some(id) = self.tasks.preempt_running() {
            self.record(DecisionKind::UnitCancelled, id, Some("emergency stop".into()));
        }
        self.pause.global = true;
        error!(
            evicted = ?evicted,
            discarded = discarded.len(),
            "emergency stop applied; all work paused"
        );
        self.record(
            DecisionKind::CommandApplied,
            stop.label(),
            evicted.map(|owner| format!("evicted {owner}")),
        );
        for command in discarded {
            self.record(
                DecisionKind::CommandDiscarded,
                command.label(),
                Some("emergency stop in batch".into()),
            );
        }
    }

    // Returns true when an emergency stop cut the command short.
    async fn apply_command(&mut self, command: ControlCommand) -> bool {
        let mut interrupted = false;
        let now = self.clock.now_ms();
        let target = command.target.as_deref();
        let result = match command.kind {
            CommandKind::Pause => {
                self.pause.global = true;
                Ok(())
            }
            CommandKind::Resume => {
                self.pause = PauseFlags::default();
                Ok(())
            }
            CommandKind::PauseScheduler => {
                self.pause.scheduler = true;
                Ok(())
            }
            CommandKind::ResumeScheduler => {
                self.pause.scheduler = false;
                Ok(())
            }
            CommandKind::PauseDetection => {
                self.pause.detection = true;
                Ok(())
            }
            CommandKind::ResumeDetection => {
                self.pause.detection = false;
                Ok(())
            }
            CommandKind::ForceRefresh => {
                self.force_refresh = true;
                self.health.request_check();
                Ok(())
            }
            CommandKind::RestartTask => match target {
                Some(id) => self.tasks.restart(id).map_err(err_text),
                None => Err("restart_task needs a target".into()),
            },
            CommandKind::SkipTask => {
                let id = target
                    .map(str::to_string)
                    .or_else(|| self.tasks.running().map(|t| t.id().to_string()));
                match id {
                    Some(id) => self.tasks.skip(&id, now).map_err(err_text),
                    None => Err("no running task to skip".into()),
                }
            }
            CommandKind::EnablePosition => match target {
                Some(id) if self.tasks.contains(id) => self.tasks.enable(id).map_err(err_text),
                Some(id) if self.watchers.contains(id) => {
                    self.watchers.activate(id).map_err(err_text)
                }
                _ => self.forward_to_extension(&command, &mut interrupted).await,
            },
            CommandKind::DisablePosition => match target {
                Some(id) if self.tasks.contains(id) => self.tasks.disable(id).map_err(err_text),
                Some(id) if self.watchers.contains(id) => {
                    self.watchers.deactivate(id).map_err(err_text)
                }
                _ => self.forward_to_extension(&command, &mut interrupted).await,
            },
            CommandKind::RemoveById => match target {
                Some(id) if self.tasks.contains(id) => self.tasks.remove(id).map_err(err_text),
                Some(id) if self.watchers.contains(id) => {
                    self.watchers.remove(id).map_err(err_text)
                }
                _ => self.forward_to_extension(&command, &mut interrupted).await,
            },
            CommandKind::Custom => self.forward_to_extension(&command, &mut interrupted).await,
            // Batches containing a stop never reach this point.
            CommandKind::EmergencyStop => Ok(()),
        };

        let label = command.label();
        match result {
            Ok(()) => {
                info!(command = %label, seq = command.seq, "command applied");
                self.record(DecisionKind::CommandApplied, label, None);
            }
            Err(reason) => {
                warn!(command = %label, seq = command.seq, %reason, "command rejected");
                self.record(DecisionKind::CommandRejected, label, Some(reason));
            }
        }
        interrupted
    }

    async fn forward_to_extension(
        &mut self,
        command: &ControlCommand,
        interrupted: &mut bool,
    ) -> Result<(), String> {
        let Some(extension) = self.collab.extension.clone() else {
            return Err("no command extension installed".into());
        };
        let lock = Arc::clone(&self.lock);
        let actuator = Arc::clone(&self.collab.actuator);
        let detector = Arc::clone(&self.collab.detector);
        let owner = LockOwner::Manual(command.label());
        let unit = async move {
            let guard = lock.acquire(owner).await;
            let input = InputHandle::new(&guard, actuator.as_ref(), detector.as_ref());
            extension.handle(command, &input).await
        };

        match race_unit(
            unit,
            self.settings.watchdog,
            &mut self.emergency,
            self.shutdown.as_mut(),
        )
        .await
        {
            UnitEnd::Finished(Ok(())) => Ok(()),
            UnitEnd::Finished(Err(err)) => Err(format!("{err:#}")),
            UnitEnd::TimedOut => Err(EngineError::Timeout(duration_ms(self.settings.watchdog)).to_string()),
            UnitEnd::Cancelled(reason) => {
                *interrupted = reason == "emergency stop";
                Err(EngineError::Cancelled(reason.into()).to_string())
            }
        }
    }

    // Phase 2, when a recovery is required.
    async fn recover(&mut self, kind: RecoveryKind) -> TickOutcome {
        if let Some(id) = self.tasks.preempt_running() {
            info!(task_id = %id, recovery = %kind, "task preempted by recovery");
            self.record(DecisionKind::Preemption, id, Some(format!("recovery {kind}")));
        }

        let started = self.health.begin_recovery(kind, self.clock.now_ms());
        self.record_transition(&started);
        self.record(DecisionKind::RecoveryStarted, kind.to_string(), None);

        let lock = Arc::clone(&self.lock);
        let actuator = Arc::clone(&self.collab.actuator);
        let detector = Arc::clone(&self.collab.detector);
        let recovery = Arc::clone(&self.collab.recovery);
        let unit = async move {
            let guard = lock.acquire(LockOwner::Recovery(kind.to_string())).await;
            let input = InputHandle::new(&guard, actuator.as_ref(), detector.as_ref());
            recovery.recover(kind, &input).await
        };
        let end = race_unit(
            unit,
            self.settings.watchdog,
            &mut self.emergency,
            self.shutdown.as_mut(),
        )
        .await;

        let failure = match end {
            UnitEnd::Finished(Ok(())) => None,
            UnitEnd::Finished(Err(err)) => Some(format!("{err:#}")),
            UnitEnd::TimedOut => Some(EngineError::Timeout(duration_ms(self.settings.watchdog)).to_string()),
            UnitEnd::Cancelled(reason) => Some(EngineError::Cancelled(reason.into()).to_string()),
        };
        let succeeded = failure.is_none();
        let report = self
            .health
            .complete_recovery(kind, succeeded, self.clock.now_ms());
        for t in &report.transitions {
            self.record_transition(t);
        }
        if let Some(reason) = failure {
            error!(recovery = %kind, %reason, "recovery failed");
            self.record(DecisionKind::RecoveryFailed, kind.to_string(), Some(reason));
        } else {
            info!(recovery = %kind, streak = report.streak, "recovery completed");
            self.record(DecisionKind::RecoveryCompleted, kind.to_string(), None);
        }
        if report.alert {
            self.record(
                DecisionKind::RecoveryAlert,
                kind.to_string(),
                Some(format!("{} recoveries in a row", report.streak)),
            );
        }
        TickOutcome::Recovery { kind, succeeded }
    }

    // Phase 3.
    async fn evaluate_watchers(&mut self, forced: bool) -> Option<TickOutcome> {
        let now = self.clock.now_ms();
        let running_priority = self.tasks.running().map(|t| t.spec().priority);
        let candidates: Vec<(WatcherId, u8, Vec<Pattern>, Option<Region>)> = self
            .watchers
            .candidates(now, forced)
            .into_iter()
            .map(|w| {
                let spec = w.spec();
                (w.id().to_string(), spec.priority, spec.patterns.clone(), spec.region)
            })
            .collect();

        for (id, priority, patterns, region) in candidates {
            let detector = Arc::clone(&self.collab.detector);
            let found = if let Ok(found) =
                tokio::time::timeout(self.settings.probe_timeout, detector.matches(&patterns, region)).await
            {
                found
            } else {
                warn!(watcher_id = %id, "pattern detection timed out");
                None
            };
            let Some(found) = found else {
                self.watchers.record_checked(&id, now);
                continue;
            };

            // Candidates arrive most urgent first, so nothing later can preempt either.
            if running_priority.is_some_and(|running| priority < running) {
                debug!(watcher_id = %id, priority, "match deferred to running task");
                return None;
            }

            if let Some(task_id) = self.tasks.preempt_running() {
                info!(task_id = %task_id, watcher_id = %id, "task preempted by watcher");
                self.record(DecisionKind::Preemption, task_id, Some(format!("watcher {id}")));
            }

            let handler = self.watchers.get(&id).map(|w| w.handler())?;
            let lock = Arc::clone(&self.lock);
            let actuator = Arc::clone(&self.collab.actuator);
            let owner = LockOwner::Watcher(id.clone());
            let unit = async move {
                let guard = lock.acquire(owner).await;
                let input = InputHandle::new(&guard, actuator.as_ref(), detector.as_ref());
                handler.handle(&found, &input).await
            };
            let end = race_unit(
                unit,
                self.settings.watchdog,
                &mut self.emergency,
                self.shutdown.as_mut(),
            )
            .await;

            let now = self.clock.now_ms();
            match end {
                UnitEnd::Finished(Ok(())) => {
                    self.watchers.record_handled(&id, now);
                    self.record(DecisionKind::WatcherHandled, id.clone(), None);
                }
                UnitEnd::Finished(Err(err)) => {
                    warn!(watcher_id = %id, error = %err, "watcher handler failed");
                    self.watchers.record_failed(&id, now);
                    self.record(DecisionKind::WatcherFailed, id.clone(), Some(format!("{err:#}")));
                }
                UnitEnd::TimedOut => {
                    warn!(watcher_id = %id, "watcher handler exceeded watchdog");
                    self.watchers.record_failed(&id, now);
                    self.record(
                        DecisionKind::WatcherFailed,
                        id.clone(),
                        Some(EngineError::Timeout(duration_ms(self.settings.watchdog)).to_string()),
                    );
                }
                UnitEnd::Cancelled(reason) => {
                    self.record(DecisionKind::UnitCancelled, id.clone(), Some(reason.into()));
                }
            }
            return Some(TickOutcome::Watcher(id));
        }
        None
    }

    // Phase 4.
    async fn step_task(&mut self) -> TickOutcome {
        let now = self.clock.now_ms();
        let (id, step, action) = if let Some(task) = self.tasks.running() {
            (task.id().to_string(), task.current_step(), task.action())
        } else if let Some(task) = self.tasks.next_due(now) {
            let picked = (task.id().to_string(), 0, task.action());
            if let Err(err) = self.tasks.begin(&picked.0) {
                error!(task_id = %picked.0, error = %err, "could not start task");
                return TickOutcome::Idle;
            }
            info!(task_id = %picked.0, "task started");
            self.record(DecisionKind::TaskStarted, picked.0.clone(), None);
            picked
        } else {
            return TickOutcome::Idle;
        };

        let lock = Arc::clone(&self.lock);
        let actuator = Arc::clone(&self.collab.actuator);
        let detector = Arc::clone(&self.collab.detector);
        let owner = LockOwner::Task(id.clone());
        let unit = async move {
            let guard = lock.acquire(owner).await;
            let input = InputHandle::new(&guard, actuator.as_ref(), detector.as_ref());
            action.step(step, &input).await
        };
        let end = race_unit(
            unit,
            self.settings.watchdog,
            &mut self.emergency,
            self.shutdown.as_mut(),
        )
        .await;

        let now = self.clock.now_ms();
        match end {
            UnitEnd::Finished(Ok(StepOutcome::Continue)) => match self.tasks.advance(&id) {
                Ok(next) => {
                    self.record(DecisionKind::TaskStep, id.clone(), Some(format!("next step {next}")));
                }
                Err(err) => error!(task_id = %id, error = %err, "task vanished mid-pass"),
            },
            UnitEnd::Finished(Ok(StepOutcome::Done)) => {
                if let Err(err) = self.tasks.record_success(&id, now) {
                    error!(task_id = %id, error = %err, "task vanished mid-pass");
                } else {
                    info!(task_id = %id, "task pass completed");
                    self.record(DecisionKind::TaskSucceeded, id.clone(), None);
                }
            }
            UnitEnd::Finished(Err(err)) => self.task_failed(&id, format!("{err:#}"), now),
            UnitEnd::TimedOut => self.task_failed(
                &id,
                EngineError::Timeout(duration_ms(self.settings.watchdog)).to_string(),
                now,
            ),
            UnitEnd::Cancelled(reason) => {
                self.tasks.preempt_running();
                warn!(task_id = %id, reason, "task step cancelled");
                self.record(DecisionKind::UnitCancelled, id.clone(), Some(reason.into()));
            }
        }
        TickOutcome::Task { id, step }
    }

    fn task_failed(&mut self, id: &str, reason: String, now: u64) {
        warn!(task_id = %id, %reason, "task pass failed");
        match self.tasks.record_failure(id, now) {
            Ok(FailureVerdict::Backoff {
                failures,
                next_due_ms,
            }) => {
                self.record(
                    DecisionKind::TaskFailed,
                    id,
                    Some(format!("{reason}; failures={failures} next_due_ms={next_due_ms}")),
                );
            }
            Ok(FailureVerdict::Suspended { failures }) => {
                self.record(DecisionKind::TaskFailed, id, Some(reason));
                self.record(
                    DecisionKind::TaskSuspended,
                    id,
                    Some(format!("{failures} consecutive failures")),
                );
            }
            Err(err) => error!(task_id = %id, error = %err, "task vanished mid-pass"),
        }
    }

    fn record_transition(&mut self, t: &Transition) {
        self.record(
            DecisionKind::HealthTransition,
            format!("{}->{}", t.from, t.to),
            Some(t.evidence.clone()),
        );
    }

    fn record(&mut self, kind: DecisionKind, subject: impl Into<String>, detail: Option<String>) {
        let event = build_decision_event(self.tick_count, self.clock.now_ms(), kind, subject, detail);
        self.audit.record(event);
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}
