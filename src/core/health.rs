//! Host health state machine.
//!
//! Each health check turns one piece of [`ProbeEvidence`] (or the lack of it,
//! when the probe timed out) into a [`HostStatus`] transition and, when the
//! host needs it, a [`RecoveryKind`] for the scheduler to execute under the
//! arbitration lock. The monitor never runs recovery itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::executor::{ProbeEvidence, ScreenCondition};

/// Condition of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// No process.
    NotRunning,
    /// Launch initiated, waiting for a responsive window.
    Starting,
    /// Running and active.
    RunningNormal,
    /// Running, nothing happening on screen.
    RunningIdle,
    /// Server maintenance screen.
    Maintenance,
    /// Session taken over elsewhere.
    RemoteLoginDetected,
    /// Process died or never became responsive.
    Crashed,
    /// Process alive, window unresponsive.
    Frozen,
    /// Recovery is tearing the application down.
    Closing,
    /// Evidence inconclusive.
    Unknown,
}

impl HostStatus {
    /// States that demand a recovery action.
    pub const fn requires_recovery(self) -> bool {
        matches!(
            self,
            Self::Maintenance | Self::RemoteLoginDetected | Self::Crashed | Self::Frozen
        )
    }

    /// States in which watchers and tasks may drive input.
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::RunningNormal | Self::RunningIdle)
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRunning => "not_running",
            Self::Starting => "starting",
            Self::RunningNormal => "running_normal",
            Self::RunningIdle => "running_idle",
            Self::Maintenance => "maintenance",
            Self::RemoteLoginDetected => "remote_login_detected",
            Self::Crashed => "crashed",
            Self::Frozen => "frozen",
            Self::Closing => "closing",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Which recovery the scheduler should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum RecoveryKind {
    /// Start the application; it is expected to be running but is not.
    Launch,
    /// Tear down and restart because of a fault.
    Restart(HostStatus),
    /// Planned restart after the maximum session runtime.
    ScheduledRestart,
}

impl fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch => f.write_str("launch"),
            Self::Restart(cause) => write!(f, "restart:{cause}"),
            Self::ScheduledRestart => f.write_str("scheduled_restart"),
        }
    }
}

/// Tunables for the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Minimum time between probes.
    pub check_interval_ms: u64,
    /// How long Starting may last before it counts as a crash.
    pub startup_grace_ms: u64,
    /// Session length that forces a planned restart; `None` disables it.
    pub max_runtime_ms: Option<u64>,
    /// Launch the application when it is found not running.
    pub auto_launch: bool,
    /// Recoveries in a row that raise an operator alert.
    pub recovery_alert_threshold: u32,
    /// Operational time after which the recovery streak resets.
    pub stable_after_ms: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            startup_grace_ms: 30_000,
            max_runtime_ms: None,
            auto_launch: true,
            recovery_alert_threshold: 3,
            stable_after_ms: 300_000,
        }
    }
}

/// A status change with its cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Previous status.
    pub from: HostStatus,
    /// New status.
    pub to: HostStatus,
    /// Human-readable evidence summary.
    pub evidence: String,
}

/// Outcome of a health evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    /// Status after evaluation.
    pub status: HostStatus,
    /// Set when the status changed.
    pub transition: Option<Transition>,
    /// Recovery to run now, if any.
    pub recovery: Option<RecoveryKind>,
}

/// Result of finishing a recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Status changes applied, in order.
    pub transitions: Vec<Transition>,
    /// Recoveries in a row, including this one.
    pub streak: u32,
    /// The streak reached the alert threshold.
    pub alert: bool,
}

/// Tracks the host's status across health checks.
#[derive(Debug)]
pub struct HealthMonitor {
    policy: HealthPolicy,
    status: HostStatus,
    entered_at_ms: u64,
    session_started_ms: Option<u64>,
    last_check_ms: Option<u64>,
    force_check: bool,
    recovery_streak: u32,
    last_evidence: Option<ProbeEvidence>,
}

impl HealthMonitor {
    /// Monitor starting in [`HostStatus::Unknown`].
    pub const fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            status: HostStatus::Unknown,
            entered_at_ms: 0,
            session_started_ms: None,
            last_check_ms: None,
            force_check: false,
            recovery_streak: 0,
            last_evidence: None,
        }
    }

    /// Current status.
    pub const fn status(&self) -> HostStatus {
        self.status
    }

    /// Policy in force.
    pub const fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Recoveries in a row without a stable session in between.
    pub const fn recovery_streak(&self) -> u32 {
        self.recovery_streak
    }

    /// Evidence from the most recent conclusive probe.
    pub const fn last_evidence(&self) -> Option<&ProbeEvidence> {
        self.last_evidence.as_ref()
    }

    /// Whether a probe should be taken at `now_ms`.
    ///
    /// Outside the running states the host is probed on every evaluation.
    pub fn is_check_due(&self, now_ms: u64) -> bool {
        self.force_check
            || !self.status.is_operational()
            || self
                .last_check_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= self.policy.check_interval_ms)
    }

    /// Force a probe on the next evaluation.
    pub fn request_check(&mut self) {
        self.force_check = true;
    }

    /// Feed one probe result; `None` means the probe was inconclusive.
    pub fn observe(&mut self, evidence: Option<ProbeEvidence>, now_ms: u64) -> HealthVerdict {
        self.last_check_ms = Some(now_ms);
        self.force_check = false;

        let next = self.classify(evidence.as_ref(), now_ms);
        let transition = (next != self.status).then(|| Transition {
            from: self.status,
            to: next,
            evidence: describe(evidence.as_ref()),
        });
        if let Some(t) = &transition {
            self.enter(t.to, now_ms);
            if t.to.requires_recovery() {
                warn!(from = %t.from, to = %t.to, evidence = %t.evidence, "host needs recovery");
            } else {
                info!(from = %t.from, to = %t.to, evidence = %t.evidence, "host status changed");
            }
        }
        if evidence.is_some() {
            self.last_evidence = evidence;
        }

        if self.status.is_operational()
            && self
                .session_started_ms
                .is_some_and(|s| now_ms.saturating_sub(s) >= self.policy.stable_after_ms)
        {
            self.recovery_streak = 0;
        }

        HealthVerdict {
            status: self.status,
            transition,
            recovery: self.pending_recovery(now_ms),
        }
    }

    /// Verdict for the current status without taking a new probe.
    pub fn standing_verdict(&self, now_ms: u64) -> HealthVerdict {
        HealthVerdict {
            status: self.status,
            transition: None,
            recovery: self.pending_recovery(now_ms),
        }
    }

    /// Recovery about to run: leave the faulted state.
    pub fn begin_recovery(&mut self, kind: RecoveryKind, now_ms: u64) -> Transition {
        let to = match kind {
            RecoveryKind::Launch => HostStatus::Starting,
            RecoveryKind::Restart(_) | RecoveryKind::ScheduledRestart => HostStatus::Closing,
        };
        let t = Transition {
            from: self.status,
            to,
            evidence: format!("recovery {kind} initiated"),
        };
        self.enter(to, now_ms);
        info!(from = %t.from, to = %t.to, recovery = %kind, "recovery started");
        t
    }

    /// Recovery finished; `succeeded` is the action's own verdict.
    pub fn complete_recovery(
        &mut self,
        kind: RecoveryKind,
        succeeded: bool,
        now_ms: u64,
    ) -> RecoveryReport {
        let mut transitions = Vec::new();
        let mut step = |monitor: &mut Self, to: HostStatus, why: &str| {
            if monitor.status != to {
                transitions.push(Transition {
                    from: monitor.status,
                    to,
                    evidence: why.to_string(),
                });
                monitor.enter(to, now_ms);
            }
        };

        if self.status == HostStatus::Closing {
            step(self, HostStatus::NotRunning, "application torn down");
        }
        if succeeded {
            step(self, HostStatus::Starting, "relaunched");
        } else {
            step(self, HostStatus::NotRunning, "recovery failed");
        }

        self.recovery_streak = self.recovery_streak.saturating_add(1);
        // The next tick always re-probes after a recovery.
        self.last_check_ms = None;
        let alert = self.recovery_streak >= self.policy.recovery_alert_threshold;
        if alert {
            warn!(streak = self.recovery_streak, recovery = %kind, "repeated recovery cycles");
        }

        RecoveryReport {
            transitions,
            streak: self.recovery_streak,
            alert,
        }
    }

    fn enter(&mut self, status: HostStatus, now_ms: u64) {
        if status.is_operational() && !self.status.is_operational() {
            self.session_started_ms = Some(now_ms);
        } else if !status.is_operational() {
            self.session_started_ms = None;
        }
        self.status = status;
        self.entered_at_ms = now_ms;
    }

    fn classify(&self, evidence: Option<&ProbeEvidence>, now_ms: u64) -> HostStatus {
        let grace_exceeded =
            now_ms.saturating_sub(self.entered_at_ms) >= self.policy.startup_grace_ms;

        if self.status == HostStatus::Starting {
            return match evidence {
                Some(e) if e.process_alive && e.window_responsive && e.screen.is_none() => {
                    HostStatus::RunningNormal
                }
                _ if grace_exceeded => HostStatus::Crashed,
                _ => HostStatus::Starting,
            };
        }

        let Some(e) = evidence else {
            debug!(status = %self.status, "probe inconclusive");
            return HostStatus::Unknown;
        };

        if !e.process_alive {
            return if self.status.is_operational() || self.status == HostStatus::Frozen {
                HostStatus::Crashed
            } else {
                HostStatus::NotRunning
            };
        }
        if !e.window_responsive {
            return HostStatus::Frozen;
        }
        match e.screen {
            Some(ScreenCondition::Maintenance) => HostStatus::Maintenance,
            Some(ScreenCondition::RemoteLogin) => HostStatus::RemoteLoginDetected,
            None if e.idle => HostStatus::RunningIdle,
            None => HostStatus::RunningNormal,
        }
    }

    fn pending_recovery(&self, now_ms: u64) -> Option<RecoveryKind> {
        match self.status {
            s if s.requires_recovery() => Some(RecoveryKind::Restart(s)),
            HostStatus::NotRunning if self.policy.auto_launch => Some(RecoveryKind::Launch),
            s if s.is_operational() => {
                let max = self.policy.max_runtime_ms?;
                let started = self.session_started_ms?;
                (now_ms.saturating_sub(started) >= max).then_some(RecoveryKind::ScheduledRestart)
            }
            _ => None,
        }
    }
}

fn describe(evidence: Option<&ProbeEvidence>) -> String {
    evidence.map_or_else(
        || "probe inconclusive".to_string(),
        |e| {
            format!(
                "alive={} responsive={} idle={} screen={:?}",
                e.process_alive, e.window_responsive, e.idle, e.screen
            )
        },
    )
}
