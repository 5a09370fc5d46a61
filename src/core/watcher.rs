//! Exception watchers: pattern sets that interrupt routine work.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::executor::{Pattern, Region, WatcherHandler};
use crate::core::EngineError;
use crate::util::clock::duration_ms;

/// Watcher identifier.
pub type WatcherId = String;

/// Static description of a watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherSpec {
    /// Unique identifier.
    pub id: WatcherId,
    /// 0..=100, higher is more urgent.
    pub priority: u8,
    /// Templates; the first that matches triggers the handler.
    pub patterns: Vec<Pattern>,
    /// Search area for patterns that carry none of their own.
    pub region: Option<Region>,
    /// Minimum time between evaluations.
    pub check_interval: Duration,
    /// Whether the watcher is evaluated at all.
    pub active: bool,
}

impl WatcherSpec {
    /// Active watcher over `patterns`, evaluated every tick.
    pub fn new(id: impl Into<WatcherId>, priority: u8, patterns: Vec<Pattern>) -> Self {
        Self {
            id: id.into(),
            priority,
            patterns,
            region: None,
            check_interval: Duration::ZERO,
            active: true,
        }
    }

    /// Restrict the search area.
    #[must_use]
    pub const fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Evaluate at most once per `interval`.
    #[must_use]
    pub const fn every(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Register the watcher inactive.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A registered watcher with its counters.
pub struct Watcher {
    spec: WatcherSpec,
    handler: Arc<dyn WatcherHandler>,
    registered: u64,
    last_check_ms: Option<u64>,
    last_match_ms: Option<u64>,
    handled_count: u64,
    failure_count: u64,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.spec.id)
            .field("priority", &self.spec.priority)
            .field("active", &self.spec.active)
            .field("handled_count", &self.handled_count)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Identifier.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Static description.
    pub const fn spec(&self) -> &WatcherSpec {
        &self.spec
    }

    /// Reaction to a match.
    pub fn handler(&self) -> Arc<dyn WatcherHandler> {
        Arc::clone(&self.handler)
    }

    /// Last completed evaluation.
    pub const fn last_check_ms(&self) -> Option<u64> {
        self.last_check_ms
    }

    /// Last handled match.
    pub const fn last_match_ms(&self) -> Option<u64> {
        self.last_match_ms
    }

    /// Matches handled successfully.
    pub const fn handled_count(&self) -> u64 {
        self.handled_count
    }

    /// Handler failures.
    pub const fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Active and past its check interval, or `force`d.
    pub fn is_check_due(&self, now_ms: u64, force: bool) -> bool {
        self.spec.active
            && (force
                || self.last_check_ms.is_none_or(|last| {
                    now_ms.saturating_sub(last) >= duration_ms(self.spec.check_interval)
                }))
    }

    /// Serializable view.
    pub fn snapshot(&self) -> WatcherSnapshot {
        WatcherSnapshot {
            id: self.spec.id.clone(),
            priority: self.spec.priority,
            active: self.spec.active,
            last_check_ms: self.last_check_ms,
            last_match_ms: self.last_match_ms,
            handled_count: self.handled_count,
            failure_count: self.failure_count,
        }
    }
}

/// Serializable watcher status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherSnapshot {
    /// Identifier.
    pub id: WatcherId,
    /// Priority.
    pub priority: u8,
    /// Evaluated at all.
    pub active: bool,
    /// Last completed evaluation.
    pub last_check_ms: Option<u64>,
    /// Last handled match.
    pub last_match_ms: Option<u64>,
    /// Matches handled.
    pub handled_count: u64,
    /// Handler failures.
    pub failure_count: u64,
}

/// Registered watchers.
#[derive(Debug, Default)]
pub struct Watchlist {
    watchers: Vec<Watcher>,
    next_seq: u64,
}

impl Watchlist {
    /// Empty watchlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateId`] for a taken identifier;
    /// [`EngineError::InvalidConfig`] for a priority above 100, an empty
    /// pattern set or a threshold outside `0.0..=1.0`.
    pub fn add(
        &mut self,
        spec: WatcherSpec,
        handler: Arc<dyn WatcherHandler>,
    ) -> Result<(), EngineError> {
        if spec.priority > 100 {
            return Err(EngineError::InvalidConfig(format!(
                "watcher `{}` priority {} exceeds 100",
                spec.id, spec.priority
            )));
        }
        if spec.patterns.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "watcher `{}` has no patterns",
                spec.id
            )));
        }
        if let Some(p) = spec
            .patterns
            .iter()
            .find(|p| !(0.0..=1.0).contains(&p.threshold))
        {
            return Err(EngineError::InvalidConfig(format!(
                "watcher `{}` pattern `{}` threshold {} outside 0..=1",
                spec.id, p.template, p.threshold
            )));
        }
        if self.get(&spec.id).is_some() {
            return Err(EngineError::DuplicateId(spec.id));
        }

        info!(watcher_id = %spec.id, priority = spec.priority, "watcher registered");
        self.next_seq += 1;
        self.watchers.push(Watcher {
            spec,
            handler,
            registered: self.next_seq,
            last_check_ms: None,
            last_match_ms: None,
            handled_count: 0,
            failure_count: 0,
        });
        Ok(())
    }

    /// Unregister a watcher.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such watcher exists.
    pub fn remove(&mut self, id: &str) -> Result<(), EngineError> {
        let pos = self
            .watchers
            .iter()
            .position(|w| w.spec.id == id)
            .ok_or_else(|| EngineError::UnknownId(id.to_string()))?;
        self.watchers.remove(pos);
        info!(watcher_id = %id, "watcher removed");
        Ok(())
    }

    /// Include a watcher in evaluation.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such watcher exists.
    pub fn activate(&mut self, id: &str) -> Result<(), EngineError> {
        self.get_mut(id)?.spec.active = true;
        Ok(())
    }

    /// Exclude a watcher from evaluation.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownId`] if no such watcher exists.
    pub fn deactivate(&mut self, id: &str) -> Result<(), EngineError> {
        self.get_mut(id)?.spec.active = false;
        Ok(())
    }

    /// Look up a watcher.
    pub fn get(&self, id: &str) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Watcher, EngineError> {
        self.watchers
            .iter_mut()
            .find(|w| w.spec.id == id)
            .ok_or_else(|| EngineError::UnknownId(id.to_string()))
    }

    /// Whether a watcher with this identifier exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Watchers to evaluate at `now_ms`: priority desc, then registration order.
    pub fn candidates(&self, now_ms: u64, force: bool) -> Vec<&Watcher> {
        let mut due: Vec<&Watcher> = self
            .watchers
            .iter()
            .filter(|w| w.is_check_due(now_ms, force))
            .collect();
        due.sort_by(|a, b| {
            b.spec
                .priority
                .cmp(&a.spec.priority)
                .then_with(|| a.registered.cmp(&b.registered))
        });
        due
    }

    /// Evaluation found nothing.
    pub fn record_checked(&mut self, id: &str, now_ms: u64) {
        if let Ok(w) = self.get_mut(id) {
            w.last_check_ms = Some(now_ms);
        }
    }

    /// Handler completed.
    pub fn record_handled(&mut self, id: &str, now_ms: u64) {
        if let Ok(w) = self.get_mut(id) {
            w.last_check_ms = Some(now_ms);
            w.last_match_ms = Some(now_ms);
            w.handled_count += 1;
            debug!(watcher_id = %id, handled = w.handled_count, "watcher handled match");
        }
    }

    /// Handler failed or timed out.
    pub fn record_failed(&mut self, id: &str, now_ms: u64) {
        if let Ok(w) = self.get_mut(id) {
            w.last_check_ms = Some(now_ms);
            w.failure_count += 1;
        }
    }

    /// All watchers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Watcher> {
        self.watchers.iter()
    }

    /// Number of registered watchers.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Whether no watcher is registered.
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Serializable views of every watcher.
    pub fn snapshots(&self) -> Vec<WatcherSnapshot> {
        self.watchers.iter().map(Watcher::snapshot).collect()
    }
}
