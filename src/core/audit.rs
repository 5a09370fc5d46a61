//! Decision audit trail.
//!
//! Every arbitration decision the loop makes (command applied, preemption,
//! recovery, task outcome) is recorded as a [`DecisionEvent`] so an operator
//! can reconstruct why the engine did what it did.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// What kind of decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// A control command took effect.
    CommandApplied,
    /// A control command named an unknown identifier or failed.
    CommandRejected,
    /// A command was dropped because an emergency stop shared its batch.
    CommandDiscarded,
    /// The host status changed.
    HealthTransition,
    /// A recovery action began.
    RecoveryStarted,
    /// A recovery action reported success.
    RecoveryCompleted,
    /// A recovery action failed or timed out.
    RecoveryFailed,
    /// Recoveries keep repeating.
    RecoveryAlert,
    /// A running task was interrupted.
    Preemption,
    /// A watcher handler completed.
    WatcherHandled,
    /// A watcher handler failed or timed out.
    WatcherFailed,
    /// A task pass began.
    TaskStarted,
    /// A task step completed and more follow.
    TaskStep,
    /// A task pass completed.
    TaskSucceeded,
    /// A task pass failed.
    TaskFailed,
    /// A task hit its failure limit.
    TaskSuspended,
    /// A unit of work was cancelled.
    UnitCancelled,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CommandApplied => "command_applied",
            Self::CommandRejected => "command_rejected",
            Self::CommandDiscarded => "command_discarded",
            Self::HealthTransition => "health_transition",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryCompleted => "recovery_completed",
            Self::RecoveryFailed => "recovery_failed",
            Self::RecoveryAlert => "recovery_alert",
            Self::Preemption => "preemption",
            Self::WatcherHandled => "watcher_handled",
            Self::WatcherFailed => "watcher_failed",
            Self::TaskStarted => "task_started",
            Self::TaskStep => "task_step",
            Self::TaskSucceeded => "task_succeeded",
            Self::TaskFailed => "task_failed",
            Self::TaskSuspended => "task_suspended",
            Self::UnitCancelled => "unit_cancelled",
        };
        f.write_str(s)
    }
}

/// One audited decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    /// Unique event identifier.
    pub event_id: String,
    /// Loop iteration that produced the decision.
    pub tick: u64,
    /// Engine clock at the decision.
    pub timestamp_ms: u64,
    /// Decision category.
    pub kind: DecisionKind,
    /// Task, watcher, command or status concerned.
    pub subject: String,
    /// Free-form context.
    pub detail: Option<String>,
}

impl DecisionEvent {
    /// Single-line JSON rendering.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Destination for decision events.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&mut self, event: DecisionEvent);
}

/// Bounded in-memory sink; clones share the same buffer.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<DecisionEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping at most `max_events` of the newest events.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events of one kind.
    pub fn of_kind(&self, kind: DecisionKind) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Drop everything stored.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: DecisionEvent) {
        let mut events = self.events.lock();
        if self.max_events > 0 && events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Emits each decision as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: DecisionEvent) {
        info!(
            target: "steward::audit",
            event_id = %event.event_id,
            tick = event.tick,
            timestamp_ms = event.timestamp_ms,
            kind = %event.kind,
            subject = %event.subject,
            detail = event.detail.as_deref().unwrap_or(""),
            "decision"
        );
    }
}

/// Helper to build a decision event with a fresh identifier.
pub fn build_decision_event(
    tick: u64,
    timestamp_ms: u64,
    kind: DecisionKind,
    subject: impl Into<String>,
    detail: Option<String>,
) -> DecisionEvent {
    DecisionEvent {
        event_id: Uuid::new_v4().to_string(),
        tick,
        timestamp_ms,
        kind,
        subject: subject.into(),
        detail,
    }
}
