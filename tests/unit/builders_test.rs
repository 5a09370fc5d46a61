//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use steward::builders::build_scheduler;
use steward::config::{EngineConfig, PatternConfig, TaskConfig, WatcherConfig};
use steward::core::{
    AppResult, DecisionKind, EngineError, InMemoryAuditSink, InputHandle, MatchResult, StepOutcome, TaskAction,
    WatcherHandler,
};
use steward::util::clock::ManualClock;

use crate::common::collaborators;

struct Noop;

#[async_trait]
impl TaskAction for Noop {
    async fn step(&self, _step: u32, _input: &InputHandle<'_>) -> AppResult<StepOutcome> {
        Ok(StepOutcome::Done)
    }
}

#[async_trait]
impl WatcherHandler for Noop {
    async fn handle(&self, _found: &MatchResult, _input: &InputHandle<'_>) -> AppResult<()> {
        Ok(())
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 200,
        tasks: vec![
            TaskConfig {
                id: "scan".into(),
                name: Some("Scan".into()),
                priority: 40,
                interval_ms: 60_000,
                backoff_ms: 10_000,
                max_consecutive_failures: 2,
                enabled: true,
            },
            TaskConfig {
                id: "review".into(),
                name: None,
                priority: 70,
                interval_ms: 600_000,
                backoff_ms: 0,
                max_consecutive_failures: 3,
                enabled: false,
            },
        ],
        watchers: vec![WatcherConfig {
            id: "popup".into(),
            priority: 90,
            patterns: vec![PatternConfig {
                template: "popup_close".into(),
                threshold: 0.85,
                region: None,
            }],
            region: None,
            check_interval_ms: 0,
            active: true,
        }],
        ..EngineConfig::default()
    }
}

fn build<FT>(cfg: &EngineConfig, task_factory: FT) -> Result<steward::core::Scheduler, EngineError>
where
    FT: FnMut(&TaskConfig) -> Result<Arc<dyn TaskAction>, EngineError>,
{
    build_scheduler(
        cfg,
        task_factory,
        |_| Ok(Arc::new(Noop) as Arc<dyn WatcherHandler>),
        collaborators(),
        Arc::new(ManualClock::new(0)),
        Box::new(InMemoryAuditSink::new(16)),
    )
}

#[test]
fn test_build_scheduler_registers_everything() {
    let mut asked = Vec::new();
    let scheduler = build(&config(), |t| {
        asked.push(t.id.clone());
        Ok(Arc::new(Noop) as Arc<dyn TaskAction>)
    })
    .unwrap();

    assert_eq!(asked, vec!["scan", "review"]);
    assert_eq!(scheduler.tasks().len(), 2);
    assert_eq!(scheduler.watchers().len(), 1);
    assert_eq!(scheduler.settings(), &config().settings());
    assert_eq!(scheduler.tick_count(), 0);

    let scan = scheduler.tasks().get("scan").unwrap();
    assert_eq!(scan.spec().max_consecutive_failures, 2);
    assert!(!scheduler.tasks().get("review").unwrap().spec().enabled);
    assert_eq!(scheduler.tasks().next_due(0).map(|t| t.id()), Some("scan"));
}

#[test]
fn test_factory_error_aborts_build() {
    let err = build(&config(), |t| {
        if t.id == "review" {
            Err(EngineError::UnknownId(t.id.clone()))
        } else {
            Ok(Arc::new(Noop) as Arc<dyn TaskAction>)
        }
    })
    .unwrap_err();
    assert!(matches!(err, EngineError::UnknownId(id) if id == "review"));
}

#[test]
fn test_invalid_config_is_fatal() {
    let mut cfg = config();
    cfg.watchers[0].id = "scan".into();
    let err = build(&cfg, |_| Ok(Arc::new(Noop) as Arc<dyn TaskAction>)).unwrap_err();
    match err {
        EngineError::InvalidConfig(msg) => assert!(msg.contains("duplicate identifier `scan`")),
        other => panic!("expected invalid config, got {other:?}"),
    }

    let mut cfg = config();
    cfg.watchdog_ms = 0;
    assert!(matches!(
        build(&cfg, |_| Ok(Arc::new(Noop) as Arc<dyn TaskAction>)),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_config_audit_sink_keeps_newest_events() {
    let cfg = EngineConfig {
        audit_capacity: 2,
        ..config()
    };
    let audit = cfg.audit_sink();
    let mut scheduler = build_scheduler(
        &cfg,
        |_| Ok(Arc::new(Noop) as Arc<dyn TaskAction>),
        |_| Ok(Arc::new(Noop) as Arc<dyn WatcherHandler>),
        collaborators(),
        Arc::new(ManualClock::new(0)),
        Box::new(audit.clone()),
    )
    .unwrap();

    scheduler.tick().await;
    let events = audit.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].kind, DecisionKind::TaskSucceeded);
    assert_eq!(events[1].subject, "scan");
}
