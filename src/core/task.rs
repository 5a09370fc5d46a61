//! Task registry and per-task failure policy.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::executor::TaskAction;
use crate::core::EngineError;
use crate::util::clock::duration_ms;

/// Task identifier.
pub type TaskId = String;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Waiting for its next due time.
    Idle,
    /// Owns the scheduler; possibly between steps.
    Running,
    /// Last pass failed; next due time is stretched.
    Backoff,
    /// Too many consecutive failures; needs an operator to re-enable it.
    Suspended,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Backoff => "backoff",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Static description of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Unique identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// 0..=100, higher is more urgent.
    pub priority: u8,
    /// Nominal time between passes.
    pub interval: Duration,
    /// Added to the interval once per consecutive failure.
    pub backoff: Duration,
    /// Failures in a row that suspend the task.
    pub max_consecutive_failures: u32,
    /// Whether the task takes part in selection.
    pub enabled: bool,
}

impl TaskSpec {
    /// Enabled task with no backoff and a three-strike failure limit.
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        priority: u8,
        interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            interval,
            backoff: Duration::ZERO,
            max_consecutive_failures: 3,
            enabled: true,
        }
    }

    /// Set the per-failure backoff extension.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the suspension threshold.
    #[must_use]
    pub const fn with_max_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Register the task disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A registered task with its runtime state.
pub struct Task {
    spec: TaskSpec,
    action: Arc<dyn TaskAction>,
    state: RunState,
    last_run_ms: Option<u64>,
    consecutive_failures: u32,
    current_step: u32,
    run_count: u64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.spec.id)
            .field("state", &self.state)
            .field("last_run_ms", &self.last_run_ms)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("current_step", &self.current_step)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Identifier.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Static description.
    pub const fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    /// Current run state.
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Completion time of the last pass, if any.
    pub const fn last_run_ms(&self) -> Option<u64> {
        self.last_run_ms
    }

    /// Failures in a row.
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Index of the next step to run.
    pub const fn current_step(&self) -> u32 {
        self.current_step
    }

    /// Passes started so far.
    pub const fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Business logic.
    pub fn action(&self) -> Arc<dyn TaskAction> {
        Arc::clone(&self.action)
    }

    /// `last_run + interval + failures × backoff`; zero if never run.
    pub fn due_at_ms(&self) -> u64 {
        self.last_run_ms.map_or(0, |last| {
            let extension =
                duration_ms(self.spec.backoff).saturating_mul(u64::from(self.consecutive_failures));
            last.saturating_add(duration_ms(self.spec.interval))
                .saturating_add(extension)
        })
    }

    /// Enabled, not suspended and not already running.
    pub fn is_selectable(&self) -> bool {
        self.spec.enabled && !matches!(self.state, RunState::Suspended | RunState::Running)
    }

    /// Selectable and due at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.is_selectable() && self.due_at_ms() <= now_ms
    }

    /// Progress through the current pass, in percent, when steps are declared.
    pub fn progress(&self) -> Option<f32> {
        let total = self.action.total_steps()?;
        if total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = (self.current_step.min(total) as f32 / total as f32) * 100.0;
        Some(pct)
    }

    /// Serializable view.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            priority: self.spec.priority,
            enabled: self.spec.enabled,
            state: self.state,
            last_run_ms: self.last_run_ms,
            next_due_ms: self.due_at_ms(),
            consecutive_failures: self.consecutive_failures,
            run_count: self.run_count,
            current_step: self.current_step,
            progress: self.progress(),
        }
    }

    fn reset_to_idle(&mut self) {
        self.state = RunState::Idle;
        self.current_step = 0;
    }
}

/// Serializable task status for remote reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Priority.
    pub priority: u8,
    /// Enabled flag.
    pub enabled: bool,
    /// Run state.
    pub state: RunState,
    /// Last completed pass.
    pub last_run_ms: Option<u64>,
    /// Effective next due time.
    pub next_due_ms: u64,
    /// Failures in a row.
    pub consecutive_failures: u32,
    /// Passes started.
    pub run_count: u64,
    /// Next step index.
    pub current_step: u32,
    /// Percent complete, when the task declares its steps.
    pub progress: Option<f32>,
}

/// What a failed pass did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Retry later.
    Backoff {
        /// Failures in a row.
        failures: u32,
        /// Effective next due time.
        next_due_ms: u64,
    },
    /// Limit reached; the task is out of rotation.
    Suspended {
        /// Failures in a row.
        failures: u32,
    },
}

/// Selection order: priority desc, then due time asc, then identifier asc.
fn selection_order(a: &Task, b: &Task) -> Ordering {
    b.spec
        .priority
        .cmp(&a.spec.priority)
        .then_with(|| a.due_at_ms().cmp(&b.due_at_ms()))
        .then_with(|| a.spec.id.cmp(&b.spec.id))
}

/// Registered tasks, keyed by identifier, in registration order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateId`] if the identifier is taken, or
    /// [`EngineError::InvalidConfig`] for a priority above 100 or a zero
    /// failure limit.
    pub fn add(&mut self, spec: TaskSpec, action: Arc<dyn TaskAction>) -> Result<(), EngineError> {
        if spec.priority > 100 {
            return Err(EngineError::InvalidConfig(format!(
                "task `{}` priority {} exceeds 100",
                spec.id, spec.priority
            )));
        }
        if spec.max_consecutive_failures == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "task `{}` max_consecutive_failures must be greater than 0",
                spec.id
            )));
        }
        if self.get(&spec.id).is_some() {
            return Err(EngineError::DuplicateId(spec.id));
        }
        info!(task_id = %spec.id, priority = spec.priority, "task registered");
        self.tasks.push(Task {
            spec,
            action,
            state: RunState::Idle,
            last_run_ms: None,
            consecutive_failures: 0,
            current_step: 0,
            run_count: 0,
        });
        Ok(())
    }

    /// Unregister a task.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn remove(&mut self, id: &str) -> Result<(), EngineError> {
        let pos = self
            .tasks
            .iter()
            .position(|t| t.spec.id == id)
            .ok_or_else(|| EngineError::UnknownId(id.to_string()))?;
        self.tasks.remove(pos);
        info!(task_id = %id, "task removed");
        Ok(())
    }

    /// Enable a task; clears a suspension.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn enable(&mut self, id: &str) -> Result<(), EngineError> {
        let task = self.get_mut(id)?;
        task.spec.enabled = true;
        if task.state == RunState::Suspended {
            task.consecutive_failures = 0;
            task.reset_to_idle();
            info!(task_id = %id, "suspended task re-enabled");
        }
        Ok(())
    }

    /// Disable a task; a running pass is abandoned without failure.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn disable(&mut self, id: &str) -> Result<(), EngineError> {
        let task = self.get_mut(id)?;
        task.spec.enabled = false;
        if task.state == RunState::Running {
            task.reset_to_idle();
        }
        Ok(())
    }

    /// Clean slate: due now, no failures, enabled.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn restart(&mut self, id: &str) -> Result<(), EngineError> {
        let task = self.get_mut(id)?;
        task.spec.enabled = true;
        task.last_run_ms = None;
        task.consecutive_failures = 0;
        task.reset_to_idle();
        Ok(())
    }

    /// End a task's pass (or postpone an idle task) without counting a failure.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn skip(&mut self, id: &str, now_ms: u64) -> Result<(), EngineError> {
        let task = self.get_mut(id)?;
        if task.state != RunState::Suspended {
            task.reset_to_idle();
        }
        task.last_run_ms = Some(now_ms);
        Ok(())
    }

    /// Look up a task.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task, EngineError> {
        self.tasks
            .iter_mut()
            .find(|t| t.spec.id == id)
            .ok_or_else(|| EngineError::UnknownId(id.to_string()))
    }

    /// Whether a task with this identifier exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The task currently Running, if any.
    pub fn running(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.state == RunState::Running)
    }

    /// Tasks eligible at `now_ms`, in selection order.
    pub fn due_set(&self, now_ms: u64) -> Vec<&Task> {
        let mut due: Vec<&Task> = self.tasks.iter().filter(|t| t.is_due(now_ms)).collect();
        due.sort_by(|a, b| selection_order(a, b));
        due
    }

    /// Head of the due set.
    pub fn next_due(&self, now_ms: u64) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_due(now_ms))
            .min_by(|a, b| selection_order(a, b))
    }

    /// Mark a task Running at step zero.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn begin(&mut self, id: &str) -> Result<(), EngineError> {
        debug_assert!(self.running().is_none_or(|t| t.spec.id == id));
        let task = self.get_mut(id)?;
        task.state = RunState::Running;
        task.current_step = 0;
        task.run_count += 1;
        Ok(())
    }

    /// A step finished and more follow.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn advance(&mut self, id: &str) -> Result<u32, EngineError> {
        let task = self.get_mut(id)?;
        task.current_step += 1;
        Ok(task.current_step)
    }

    /// The pass completed.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn record_success(&mut self, id: &str, now_ms: u64) -> Result<(), EngineError> {
        let task = self.get_mut(id)?;
        task.consecutive_failures = 0;
        task.last_run_ms = Some(now_ms);
        task.reset_to_idle();
        Ok(())
    }

    /// The pass failed (error or watchdog).
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such task exists.
    pub fn record_failure(&mut self, id: &str, now_ms: u64) -> Result<FailureVerdict, EngineError> {
        let task = self.get_mut(id)?;
        task.consecutive_failures = task.consecutive_failures.saturating_add(1);
        task.last_run_ms = Some(now_ms);
        task.current_step = 0;
        let failures = task.consecutive_failures;
        if failures >= task.spec.max_consecutive_failures {
            task.state = RunState::Suspended;
            warn!(task_id = %id, failures, "task suspended after consecutive failures");
            Ok(FailureVerdict::Suspended { failures })
        } else {
            task.state = RunState::Backoff;
            Ok(FailureVerdict::Backoff {
                failures,
                next_due_ms: task.due_at_ms(),
            })
        }
    }

    /// Interrupt the running pass without counting a failure.
    ///
    /// Returns the preempted task's identifier. Its last-run time is kept, so
    /// its cadence is unaffected.
    pub fn preempt_running(&mut self) -> Option<TaskId> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.state == RunState::Running)?;
        task.reset_to_idle();
        Some(task.spec.id.clone())
    }

    /// All tasks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Serializable views of every task.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(Task::snapshot).collect()
    }
}
