//! Engine configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    HealthPolicy, InMemoryAuditSink, Pattern, Region, SchedulerSettings, TaskSpec, WatcherSpec,
};

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "STEWARD_CONFIG";
/// Environment override for [`EngineConfig::tick_interval_ms`].
pub const TICK_INTERVAL_ENV: &str = "STEWARD_TICK_INTERVAL_MS";
/// Environment override for [`EngineConfig::watchdog_ms`].
pub const WATCHDOG_ENV: &str = "STEWARD_WATCHDOG_MS";

const fn default_tick_interval_ms() -> u64 {
    500
}

const fn default_watchdog_ms() -> u64 {
    60_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_audit_capacity() -> usize {
    1_024
}

const fn default_max_failures() -> u32 {
    3
}

const fn default_threshold() -> f32 {
    0.8
}

const fn default_true() -> bool {
    true
}

/// Host health tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Minimum time between probes.
    pub check_interval_ms: u64,
    /// Grace period for a launch to become responsive.
    pub startup_grace_ms: u64,
    /// Planned restart after this much session time.
    pub max_runtime_ms: Option<u64>,
    /// Launch the application whenever it is found not running.
    pub auto_launch: bool,
    /// Recoveries in a row that raise an alert.
    pub recovery_alert_threshold: u32,
    /// Operational time that resets the recovery streak.
    pub stable_after_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let policy = HealthPolicy::default();
        Self {
            check_interval_ms: policy.check_interval_ms,
            startup_grace_ms: policy.startup_grace_ms,
            max_runtime_ms: policy.max_runtime_ms,
            auto_launch: policy.auto_launch,
            recovery_alert_threshold: policy.recovery_alert_threshold,
            stable_after_ms: policy.stable_after_ms,
        }
    }
}

impl HealthConfig {
    /// Validate health tunables.
    pub fn validate(&self) -> Result<(), String> {
        if self.startup_grace_ms == 0 {
            return Err("startup_grace_ms must be greater than 0".into());
        }
        if self.recovery_alert_threshold == 0 {
            return Err("recovery_alert_threshold must be greater than 0".into());
        }
        if self.max_runtime_ms == Some(0) {
            return Err("max_runtime_ms must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Policy for the health monitor.
    pub const fn to_policy(&self) -> HealthPolicy {
        HealthPolicy {
            check_interval_ms: self.check_interval_ms,
            startup_grace_ms: self.startup_grace_ms,
            max_runtime_ms: self.max_runtime_ms,
            auto_launch: self.auto_launch,
            recovery_alert_threshold: self.recovery_alert_threshold,
            stable_after_ms: self.stable_after_ms,
        }
    }
}

/// One recurring task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique identifier; also selects the action factory.
    pub id: String,
    /// Display name; defaults to the identifier.
    #[serde(default)]
    pub name: Option<String>,
    /// 0..=100.
    pub priority: u8,
    /// Nominal interval.
    pub interval_ms: u64,
    /// Added to the interval per consecutive failure.
    #[serde(default)]
    pub backoff_ms: u64,
    /// Failures in a row that suspend the task.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// Registered enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TaskConfig {
    /// Validate one task entry.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".into());
        }
        if self.priority > 100 {
            return Err(format!("priority {} exceeds 100", self.priority));
        }
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be greater than 0".into());
        }
        Ok(())
    }

    /// Registry description.
    pub fn to_spec(&self) -> TaskSpec {
        let mut spec = TaskSpec::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
            self.priority,
            Duration::from_millis(self.interval_ms),
        )
        .with_backoff(Duration::from_millis(self.backoff_ms))
        .with_max_failures(self.max_consecutive_failures);
        if !self.enabled {
            spec = spec.disabled();
        }
        spec
    }
}

/// One detection template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Template identifier.
    pub template: String,
    /// Minimum confidence.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Pattern-specific region.
    #[serde(default)]
    pub region: Option<Region>,
}

impl From<&PatternConfig> for Pattern {
    fn from(cfg: &PatternConfig) -> Self {
        Self {
            template: cfg.template.clone(),
            threshold: cfg.threshold,
            region: cfg.region,
        }
    }
}

/// One exception watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Unique identifier; also selects the handler factory.
    pub id: String,
    /// 0..=100.
    pub priority: u8,
    /// Templates to look for.
    pub patterns: Vec<PatternConfig>,
    /// Search area.
    #[serde(default)]
    pub region: Option<Region>,
    /// Minimum time between evaluations.
    #[serde(default)]
    pub check_interval_ms: u64,
    /// Registered active.
    #[serde(default = "default_true")]
    pub active: bool,
}

impl WatcherConfig {
    /// Validate one watcher entry.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".into());
        }
        if self.priority > 100 {
            return Err(format!("priority {} exceeds 100", self.priority));
        }
        if self.patterns.is_empty() {
            return Err("at least one pattern must be defined".into());
        }
        for p in &self.patterns {
            if !(0.0..=1.0).contains(&p.threshold) {
                return Err(format!(
                    "pattern `{}` threshold {} outside 0..=1",
                    p.template, p.threshold
                ));
            }
        }
        Ok(())
    }

    /// Watchlist description.
    pub fn to_spec(&self) -> WatcherSpec {
        let mut spec = WatcherSpec::new(
            self.id.clone(),
            self.priority,
            self.patterns.iter().map(Pattern::from).collect(),
        )
        .every(Duration::from_millis(self.check_interval_ms));
        if let Some(region) = self.region {
            spec = spec.in_region(region);
        }
        if !self.active {
            spec = spec.inactive();
        }
        spec
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sleep between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on one unit of work.
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    /// Upper bound on one probe or detection.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Events kept by the in-memory audit sink.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    /// Host health tunables.
    #[serde(default)]
    pub health: HealthConfig,
    /// Recurring tasks.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    /// Exception watchers.
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            watchdog_ms: default_watchdog_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            audit_capacity: default_audit_capacity(),
            health: HealthConfig::default(),
            tasks: Vec::new(),
            watchers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Validate timing, health, and every task and watcher; identifiers must
    /// be unique across tasks and watchers alike.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.watchdog_ms == 0 {
            return Err("watchdog_ms must be greater than 0".into());
        }
        if self.probe_timeout_ms == 0 {
            return Err("probe_timeout_ms must be greater than 0".into());
        }
        self.health
            .validate()
            .map_err(|e| format!("health invalid: {e}"))?;

        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.validate()
                .map_err(|e| format!("task `{}` invalid: {e}", task.id))?;
            if !seen.insert(task.id.as_str()) {
                return Err(format!("duplicate identifier `{}`", task.id));
            }
        }
        for watcher in &self.watchers {
            watcher
                .validate()
                .map_err(|e| format!("watcher `{}` invalid: {e}", watcher.id))?;
            if !seen.insert(watcher.id.as_str()) {
                return Err(format!("duplicate identifier `{}`", watcher.id));
            }
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Load `.env`, then the file named by `STEWARD_CONFIG` (defaults when
    /// unset), then apply environment overrides and validate.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Override timing from the environment; unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(TICK_INTERVAL_ENV) {
            if let Ok(ms) = raw.trim().parse::<u64>() {
                self.tick_interval_ms = ms;
            }
        }
        if let Ok(raw) = std::env::var(WATCHDOG_ENV) {
            if let Ok(ms) = raw.trim().parse::<u64>() {
                self.watchdog_ms = ms;
            }
        }
    }

    /// Loop timing.
    pub const fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            watchdog: Duration::from_millis(self.watchdog_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    /// In-memory audit sink holding at most `audit_capacity` events.
    pub fn audit_sink(&self) -> InMemoryAuditSink {
        InMemoryAuditSink::new(self.audit_capacity)
    }
}
