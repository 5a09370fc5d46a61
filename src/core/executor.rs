//! Collaborator interfaces and the business-logic traits plugged into the engine.
//!
//! The engine is agnostic to how the screen is captured, how patterns are
//! matched and how input is injected. Those concerns arrive through
//! [`StatusProbe`], [`PatternDetector`] and [`InputActuator`]. Business logic
//! arrives through [`TaskAction`], [`WatcherHandler`], [`RecoveryAction`] and
//! [`CommandExtension`], each of which receives an [`InputHandle`] that only
//! exists while the arbitration lock is held.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::health::RecoveryKind;
use crate::core::lock::{ArbitrationGuard, LockOwner};
use crate::core::{AppResult, EngineError};
use crate::infra::inbox::ControlCommand;

/// Disruptive screen condition recognised by the status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenCondition {
    /// Server maintenance notice.
    Maintenance,
    /// Session taken over by a login elsewhere.
    RemoteLogin,
}

/// Evidence returned by one status probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEvidence {
    /// The target process exists.
    pub process_alive: bool,
    /// The main window answers within the probe's own bound.
    pub window_responsive: bool,
    /// Activity heuristic: alive but nothing happening on screen.
    #[serde(default)]
    pub idle: bool,
    /// A recognised disruptive screen, if any.
    #[serde(default)]
    pub screen: Option<ScreenCondition>,
}

impl ProbeEvidence {
    /// Alive, responsive, active.
    pub const fn healthy() -> Self {
        Self {
            process_alive: true,
            window_responsive: true,
            idle: false,
            screen: None,
        }
    }

    /// No process found.
    pub const fn not_running() -> Self {
        Self {
            process_alive: false,
            window_responsive: false,
            idle: false,
            screen: None,
        }
    }

    /// Process present but its window does not respond.
    pub const fn frozen() -> Self {
        Self {
            process_alive: true,
            window_responsive: false,
            idle: false,
            screen: None,
        }
    }

    /// Healthy process showing a disruptive screen.
    pub const fn showing(screen: ScreenCondition) -> Self {
        Self {
            process_alive: true,
            window_responsive: true,
            idle: false,
            screen: Some(screen),
        }
    }
}

/// Rectangular screen area, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// One template to look for, with its confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Template identifier understood by the detector.
    pub template: String,
    /// Minimum confidence in `0.0..=1.0`.
    pub threshold: f32,
    /// Pattern-specific search area, overriding the set's region.
    #[serde(default)]
    pub region: Option<Region>,
}

/// A successful detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Template that matched.
    pub template: String,
    /// Reported confidence.
    pub confidence: f32,
    /// Match centre, x.
    pub x: i32,
    /// Match centre, y.
    pub y: i32,
}

/// Primitive operation on the input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputAction {
    /// Left click at a point.
    Click {
        /// X coordinate.
        x: i32,
        /// Y coordinate.
        y: i32,
    },
    /// Double click at a point.
    DoubleClick {
        /// X coordinate.
        x: i32,
        /// Y coordinate.
        y: i32,
    },
    /// Press and release a named key.
    KeyPress {
        /// Key name, e.g. `enter`.
        key: String,
    },
    /// Type literal text.
    TypeText {
        /// Text to type.
        text: String,
    },
    /// Bring a window to the foreground.
    FocusWindow {
        /// Window title substring.
        title: String,
    },
    /// Pause between actions.
    Wait {
        /// Milliseconds.
        ms: u64,
    },
}

/// Reports the target application's lifecycle evidence.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Take one probe. The engine bounds this call with its probe timeout.
    async fn probe(&self) -> ProbeEvidence;
}

/// Finds patterns on screen.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    /// First pattern of `patterns` that matches, searched within `region`
    /// unless the pattern carries its own.
    async fn matches(&self, patterns: &[Pattern], region: Option<Region>) -> Option<MatchResult>;
}

/// The only sink for mouse, keyboard and window operations.
#[async_trait]
pub trait InputActuator: Send + Sync {
    /// Perform the actions in order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Actuation`] if any action fails.
    async fn perform_sequence(&self, actions: &[InputAction]) -> Result<(), EngineError>;
}

/// Access to the input device for the duration of one unit of work.
///
/// Only constructible from an [`ArbitrationGuard`], so holding one proves the
/// lock is owned.
pub struct InputHandle<'a> {
    guard: &'a ArbitrationGuard,
    actuator: &'a dyn InputActuator,
    detector: &'a dyn PatternDetector,
}

impl<'a> InputHandle<'a> {
    /// Bind collaborators to a live lock grant.
    pub fn new(
        guard: &'a ArbitrationGuard,
        actuator: &'a dyn InputActuator,
        detector: &'a dyn PatternDetector,
    ) -> Self {
        Self {
            guard,
            actuator,
            detector,
        }
    }

    /// Actor owning this unit of work.
    pub const fn owner(&self) -> &LockOwner {
        self.guard.owner()
    }

    /// Perform an action sequence if the grant is still valid.
    ///
    /// # Errors
    ///
    /// [`EngineError::LockRevoked`] if the lock was force-released, otherwise
    /// whatever the actuator reports.
    pub async fn perform(&self, actions: &[InputAction]) -> Result<(), EngineError> {
        self.guard.ensure_held()?;
        self.actuator.perform_sequence(actions).await
    }

    /// Look for patterns on screen from within the unit of work.
    pub async fn find(&self, patterns: &[Pattern], region: Option<Region>) -> Option<MatchResult> {
        self.detector.matches(patterns, region).await
    }
}

/// Result of one step of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// More steps follow; the task stays Running.
    Continue,
    /// The task's pass is complete.
    Done,
}

/// Business logic of a recurring task, executed one step per unit of work.
///
/// # Example
///
/// ```rust,ignore
/// struct ReviewApplications;
///
/// #[async_trait]
/// impl TaskAction for ReviewApplications {
///     async fn step(&self, step: u32, input: &InputHandle<'_>) -> AppResult<StepOutcome> {
///         match step {
///             0 => input.perform(&[InputAction::KeyPress { key: "f5".into() }]).await?,
///             _ => return Ok(StepOutcome::Done),
///         }
///         Ok(StepOutcome::Continue)
///     }
/// }
/// ```
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Run step `step` (zero-based) of the current pass.
    async fn step(&self, step: u32, input: &InputHandle<'_>) -> AppResult<StepOutcome>;

    /// Declared number of steps, used for progress reporting only.
    fn total_steps(&self) -> Option<u32> {
        None
    }
}

/// Reaction to a watcher match.
#[async_trait]
pub trait WatcherHandler: Send + Sync {
    /// Deal with the detected condition.
    async fn handle(&self, found: &MatchResult, input: &InputHandle<'_>) -> AppResult<()>;
}

/// Host recovery: tear down and restart the target application.
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    /// Perform the recovery appropriate for `kind`.
    async fn recover(&self, kind: RecoveryKind, input: &InputHandle<'_>) -> AppResult<()>;
}

/// Receives control commands the engine does not resolve itself
/// (`Custom`, and position commands naming no task or watcher).
#[async_trait]
pub trait CommandExtension: Send + Sync {
    /// Handle the command while holding the arbitration lock.
    async fn handle(&self, command: &ControlCommand, input: &InputHandle<'_>) -> AppResult<()>;
}
