//! Build a scheduler from configuration plus business-logic factories.

use std::sync::Arc;

use crate::config::{EngineConfig, TaskConfig, WatcherConfig};
use crate::core::{
    ArbitrationLock, AuditSink, Collaborators, EngineError, HealthMonitor, Scheduler,
    SchedulerParts, TaskAction, TaskRegistry, WatcherHandler, Watchlist,
};
use crate::infra::CommandInbox;
use crate::util::clock::Clock;

/// Validate `cfg` and wire a [`Scheduler`], asking the factories for each
/// task's action and each watcher's handler.
///
/// # Errors
///
/// Fatal initialization failures: invalid configuration, a factory that
/// cannot supply an action or handler, or a duplicate identifier.
pub fn build_scheduler<FT, FW>(
    cfg: &EngineConfig,
    mut task_factory: FT,
    mut handler_factory: FW,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    audit: Box<dyn AuditSink>,
) -> Result<Scheduler, EngineError>
where
    FT: FnMut(&TaskConfig) -> Result<Arc<dyn TaskAction>, EngineError>,
    FW: FnMut(&WatcherConfig) -> Result<Arc<dyn WatcherHandler>, EngineError>,
{
    cfg.validate()
        .map_err(|e| EngineError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut tasks = TaskRegistry::new();
    for task_cfg in &cfg.tasks {
        let action = task_factory(task_cfg)?;
        tasks.add(task_cfg.to_spec(), action)?;
    }

    let mut watchers = Watchlist::new();
    for watcher_cfg in &cfg.watchers {
        let handler = handler_factory(watcher_cfg)?;
        watchers.add(watcher_cfg.to_spec(), handler)?;
    }

    let parts = SchedulerParts {
        tasks,
        watchers,
        health: HealthMonitor::new(cfg.health.to_policy()),
        inbox: CommandInbox::new(),
        lock: ArbitrationLock::shared(),
        clock,
        audit,
    };
    Ok(Scheduler::new(cfg.settings(), parts, collaborators))
}
