//! Core arbitration: lock, registries, health state machine and the loop.

pub mod audit;
pub mod error;
pub mod executor;
pub mod health;
pub mod lock;
pub mod scheduler;
pub mod task;
pub mod watcher;

pub use audit::{
    build_decision_event, AuditSink, DecisionEvent, DecisionKind, InMemoryAuditSink,
    TracingAuditSink,
};
pub use error::{AppResult, EngineError};
pub use executor::{
    CommandExtension, InputAction, InputActuator, InputHandle, MatchResult, Pattern,
    PatternDetector, ProbeEvidence, RecoveryAction, Region, ScreenCondition, StatusProbe,
    StepOutcome, TaskAction, WatcherHandler,
};
pub use health::{HealthMonitor, HealthPolicy, HealthVerdict, HostStatus, RecoveryKind};
pub use lock::{ArbitrationGuard, ArbitrationLock, LockOwner};
pub use scheduler::{
    Collaborators, EngineStatus, PauseFlags, Scheduler, SchedulerParts, SchedulerSettings,
    TickOutcome,
};
pub use task::{FailureVerdict, RunState, Task, TaskId, TaskRegistry, TaskSnapshot, TaskSpec};
pub use watcher::{Watcher, WatcherId, WatcherSnapshot, WatcherSpec, Watchlist};
