//! Fake collaborators and a scheduler harness shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use steward::core::{
    ArbitrationLock, Collaborators, CommandExtension, DecisionKind, EngineError, HealthMonitor,
    HealthPolicy, InMemoryAuditSink, InputAction, InputActuator, InputHandle, MatchResult,
    Pattern, PatternDetector, ProbeEvidence, RecoveryAction, RecoveryKind, Region, Scheduler,
    SchedulerParts, SchedulerSettings, StatusProbe, StepOutcome, TaskAction, TaskRegistry,
    TaskSpec, WatcherHandler, WatcherSpec, Watchlist,
};
use steward::infra::{CommandInbox, ControlCommand};
use steward::util::clock::ManualClock;

pub const MIN: Duration = Duration::from_secs(60);
pub const T0: u64 = 1_000_000;

/// Ordered record of every unit of work, plus a concurrency check.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    violations: Arc<AtomicUsize>,
}

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Enter a unit: log it and check it is alone and owns the lock.
    fn enter(&self, entry: String, lock: &ArbitrationLock, input: &InputHandle<'_>) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        if lock.holder().as_ref() != Some(input.owner()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.lock().push(entry);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Leaves the unit even when the future is dropped mid-flight.
struct Leave<'a>(&'a Journal);

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

pub struct FakeProbe {
    evidence: Mutex<ProbeEvidence>,
    hang: AtomicBool,
}

impl FakeProbe {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self {
            evidence: Mutex::new(ProbeEvidence::healthy()),
            hang: AtomicBool::new(false),
        })
    }

    pub fn set(&self, evidence: ProbeEvidence) {
        *self.evidence.lock() = evidence;
    }

    pub fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusProbe for FakeProbe {
    async fn probe(&self) -> ProbeEvidence {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.evidence.lock().clone()
    }
}

#[derive(Default)]
pub struct FakeDetector {
    visible: Mutex<HashSet<String>>,
}

impl FakeDetector {
    pub fn show(&self, template: &str) {
        self.visible.lock().insert(template.to_string());
    }

    pub fn hide(&self, template: &str) {
        self.visible.lock().remove(template);
    }
}

#[async_trait]
impl PatternDetector for FakeDetector {
    async fn matches(&self, patterns: &[Pattern], _region: Option<Region>) -> Option<MatchResult> {
        let visible = self.visible.lock();
        patterns
            .iter()
            .find(|p| visible.contains(&p.template))
            .map(|p| MatchResult {
                template: p.template.clone(),
                confidence: 0.95,
                x: 10,
                y: 20,
            })
    }
}

#[derive(Default)]
pub struct RecordingActuator {
    performed: Mutex<Vec<InputAction>>,
}

impl RecordingActuator {
    pub fn performed(&self) -> usize {
        self.performed.lock().len()
    }
}

#[async_trait]
impl InputActuator for RecordingActuator {
    async fn perform_sequence(&self, actions: &[InputAction]) -> Result<(), EngineError> {
        self.performed.lock().extend_from_slice(actions);
        Ok(())
    }
}

/// Task with a fixed number of steps; can be told to fail or hang.
pub struct ScriptedTask {
    id: String,
    steps: u32,
    journal: Journal,
    lock: Arc<ArbitrationLock>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl ScriptedTask {
    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskAction for ScriptedTask {
    async fn step(&self, step: u32, input: &InputHandle<'_>) -> steward::core::AppResult<StepOutcome> {
        self.journal.enter(format!("{}:{step}", self.id), &self.lock, input);
        let _leave = Leave(&self.journal);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("{} could not find its button", self.id));
        }
        input
            .perform(&[InputAction::KeyPress { key: "enter".into() }])
            .await?;
        if step + 1 >= self.steps {
            Ok(StepOutcome::Done)
        } else {
            Ok(StepOutcome::Continue)
        }
    }

    fn total_steps(&self) -> Option<u32> {
        Some(self.steps)
    }
}

pub struct RecordingHandler {
    id: String,
    journal: Journal,
    lock: Arc<ArbitrationLock>,
    fail: AtomicBool,
}

impl RecordingHandler {
    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl WatcherHandler for RecordingHandler {
    async fn handle(&self, found: &MatchResult, input: &InputHandle<'_>) -> steward::core::AppResult<()> {
        self.journal.enter(format!("watcher:{}", self.id), &self.lock, input);
        let _leave = Leave(&self.journal);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("popup would not close"));
        }
        input
            .perform(&[InputAction::Click { x: found.x, y: found.y }])
            .await?;
        Ok(())
    }
}

/// Relaunches by flipping the probe back to healthy, unless told to fail.
pub struct FakeRecovery {
    journal: Journal,
    lock: Arc<ArbitrationLock>,
    probe: Arc<FakeProbe>,
    fail: AtomicBool,
}

impl FakeRecovery {
    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecoveryAction for FakeRecovery {
    async fn recover(&self, kind: RecoveryKind, input: &InputHandle<'_>) -> steward::core::AppResult<()> {
        self.journal.enter(format!("recovery:{kind}"), &self.lock, input);
        let _leave = Leave(&self.journal);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("launcher did not start"));
        }
        self.probe.set(ProbeEvidence::healthy());
        Ok(())
    }
}

pub struct RecordingExtension {
    journal: Journal,
    lock: Arc<ArbitrationLock>,
    hang: AtomicBool,
}

impl RecordingExtension {
    pub fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExtension for RecordingExtension {
    async fn handle(&self, command: &ControlCommand, input: &InputHandle<'_>) -> steward::core::AppResult<()> {
        self.journal.enter(format!("extension:{}", command.label()), &self.lock, input);
        let _leave = Leave(&self.journal);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        Ok(())
    }
}

pub fn pattern(template: &str) -> Vec<Pattern> {
    vec![Pattern {
        template: template.into(),
        threshold: 0.8,
        region: None,
    }]
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        tick_interval: Duration::from_millis(100),
        watchdog: Duration::from_secs(1),
        probe_timeout: Duration::from_millis(200),
    }
}

pub fn policy() -> HealthPolicy {
    HealthPolicy {
        check_interval_ms: 0,
        startup_grace_ms: 10_000,
        max_runtime_ms: None,
        auto_launch: true,
        recovery_alert_threshold: 3,
        stable_after_ms: 60_000,
    }
}

/// Healthy fakes with no journal, for wiring tests that never tick.
pub fn collaborators() -> Collaborators {
    let probe = FakeProbe::healthy();
    Collaborators {
        probe: Arc::clone(&probe) as Arc<dyn StatusProbe>,
        detector: Arc::new(FakeDetector::default()),
        actuator: Arc::new(RecordingActuator::default()),
        recovery: Arc::new(FakeRecovery {
            journal: Journal::default(),
            lock: ArbitrationLock::shared(),
            probe,
            fail: AtomicBool::new(false),
        }),
        extension: None,
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub clock: ManualClock,
    pub probe: Arc<FakeProbe>,
    pub detector: Arc<FakeDetector>,
    pub actuator: Arc<RecordingActuator>,
    pub recovery: Arc<FakeRecovery>,
    pub journal: Journal,
    pub audit: InMemoryAuditSink,
    pub lock: Arc<ArbitrationLock>,
    pub extension: Option<Arc<RecordingExtension>>,
    tasks: HashMap<String, Arc<ScriptedTask>>,
    handlers: HashMap<String, Arc<RecordingHandler>>,
}

impl Harness {
    /// Tasks with their step counts, watchers, and whether to install a
    /// command extension.
    pub fn new(tasks: Vec<(TaskSpec, u32)>, watchers: Vec<WatcherSpec>, extension: bool) -> Self {
        Self::with_policy(tasks, watchers, extension, policy())
    }

    pub fn with_policy(
        tasks: Vec<(TaskSpec, u32)>,
        watchers: Vec<WatcherSpec>,
        extension: bool,
        policy: HealthPolicy,
    ) -> Self {
        let clock = ManualClock::new(T0);
        let lock = ArbitrationLock::shared();
        let journal = Journal::default();
        let probe = FakeProbe::healthy();
        let detector = Arc::new(FakeDetector::default());
        let actuator = Arc::new(RecordingActuator::default());
        let recovery = Arc::new(FakeRecovery {
            journal: journal.clone(),
            lock: Arc::clone(&lock),
            probe: Arc::clone(&probe),
            fail: AtomicBool::new(false),
        });
        let audit = InMemoryAuditSink::new(4_096);

        let mut registry = TaskRegistry::new();
        let mut task_map = HashMap::new();
        for (spec, steps) in tasks {
            let action = Arc::new(ScriptedTask {
                id: spec.id.clone(),
                steps,
                journal: journal.clone(),
                lock: Arc::clone(&lock),
                fail: AtomicBool::new(false),
                hang: AtomicBool::new(false),
            });
            task_map.insert(spec.id.clone(), Arc::clone(&action));
            registry.add(spec, action).unwrap();
        }

        let mut watchlist = Watchlist::new();
        let mut handler_map = HashMap::new();
        for spec in watchers {
            let handler = Arc::new(RecordingHandler {
                id: spec.id.clone(),
                journal: journal.clone(),
                lock: Arc::clone(&lock),
                fail: AtomicBool::new(false),
            });
            handler_map.insert(spec.id.clone(), Arc::clone(&handler));
            watchlist.add(spec, handler).unwrap();
        }

        let extension = extension.then(|| {
            Arc::new(RecordingExtension {
                journal: journal.clone(),
                lock: Arc::clone(&lock),
                hang: AtomicBool::new(false),
            })
        });

        let scheduler = Scheduler::new(
            settings(),
            SchedulerParts {
                tasks: registry,
                watchers: watchlist,
                health: HealthMonitor::new(policy),
                inbox: CommandInbox::new(),
                lock: Arc::clone(&lock),
                clock: Arc::new(clock.clone()),
                audit: Box::new(audit.clone()),
            },
            Collaborators {
                probe: Arc::clone(&probe) as Arc<dyn StatusProbe>,
                detector: Arc::clone(&detector) as Arc<dyn PatternDetector>,
                actuator: Arc::clone(&actuator) as Arc<dyn InputActuator>,
                recovery: Arc::clone(&recovery) as Arc<dyn RecoveryAction>,
                extension: extension
                    .clone()
                    .map(|e| e as Arc<dyn CommandExtension>),
            },
        );

        Self {
            scheduler,
            clock,
            probe,
            detector,
            actuator,
            recovery,
            journal,
            audit,
            lock,
            extension,
            tasks: task_map,
            handlers: handler_map,
        }
    }

    pub fn task(&self, id: &str) -> Arc<ScriptedTask> {
        Arc::clone(&self.tasks[id])
    }

    pub fn handler(&self, id: &str) -> Arc<RecordingHandler> {
        Arc::clone(&self.handlers[id])
    }

    pub fn send(&self, command: ControlCommand) {
        self.scheduler.sender().send(command).unwrap();
    }

    pub fn events(&self, kind: DecisionKind) -> usize {
        self.audit.of_kind(kind).len()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}
