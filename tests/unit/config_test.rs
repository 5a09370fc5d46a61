//! Tests for configuration validation

use std::time::Duration;

use steward::config::{
    EngineConfig, HealthConfig, PatternConfig, TaskConfig, WatcherConfig, CONFIG_PATH_ENV,
    TICK_INTERVAL_ENV, WATCHDOG_ENV,
};
use steward::core::Region;

fn task(id: &str) -> TaskConfig {
    TaskConfig {
        id: id.to_string(),
        name: None,
        priority: 50,
        interval_ms: 60_000,
        backoff_ms: 0,
        max_consecutive_failures: 3,
        enabled: true,
    }
}

fn watcher(id: &str) -> WatcherConfig {
    WatcherConfig {
        id: id.to_string(),
        priority: 90,
        patterns: vec![PatternConfig {
            template: "popup_close".to_string(),
            threshold: 0.8,
            region: None,
        }],
        region: None,
        check_interval_ms: 0,
        active: true,
    }
}

#[test]
fn test_engine_config_validation() {
    let valid = EngineConfig {
        tasks: vec![task("scan"), task("review")],
        watchers: vec![watcher("popup")],
        ..EngineConfig::default()
    };
    assert!(valid.validate().is_ok());
}

#[test]
fn test_engine_config_invalid_timing() {
    for cfg in [
        EngineConfig { tick_interval_ms: 0, ..EngineConfig::default() },
        EngineConfig { watchdog_ms: 0, ..EngineConfig::default() },
        EngineConfig { probe_timeout_ms: 0, ..EngineConfig::default() },
    ] {
        assert!(cfg.validate().is_err());
    }
}

#[test]
fn test_task_config_invalid_fields() {
    let mut t = task("scan");
    t.priority = 101;
    assert!(t.validate().unwrap_err().contains("exceeds 100"));

    let mut t = task("scan");
    t.interval_ms = 0;
    assert!(t.validate().is_err());

    let mut t = task("scan");
    t.max_consecutive_failures = 0;
    assert!(t.validate().is_err());

    assert!(task("  ").validate().is_err());
}

#[test]
fn test_watcher_config_invalid_fields() {
    let mut w = watcher("popup");
    w.patterns.clear();
    assert!(w.validate().is_err());

    let mut w = watcher("popup");
    w.patterns[0].threshold = 1.5;
    assert!(w.validate().unwrap_err().contains("outside 0..=1"));

    let mut w = watcher("popup");
    w.priority = 200;
    assert!(w.validate().is_err());
}

#[test]
fn test_health_config_invalid_fields() {
    let cfg = EngineConfig {
        health: HealthConfig {
            startup_grace_ms: 0,
            ..HealthConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(cfg.validate().unwrap_err().starts_with("health invalid"));

    let health = HealthConfig {
        max_runtime_ms: Some(0),
        ..HealthConfig::default()
    };
    assert!(health.validate().is_err());
}

#[test]
fn test_duplicate_task_ids_rejected() {
    let cfg = EngineConfig {
        tasks: vec![task("scan"), task("scan")],
        ..EngineConfig::default()
    };
    assert_eq!(cfg.validate().unwrap_err(), "duplicate identifier `scan`");
}

#[test]
fn test_full_document_parses() {
    let json = r#"{
        "tick_interval_ms": 250,
        "watchdog_ms": 30000,
        "health": {"check_interval_ms": 2000, "max_runtime_ms": 14400000},
        "tasks": [
            {"id": "scan", "name": "Harbor scan", "priority": 60, "interval_ms": 300000, "backoff_ms": 60000}
        ],
        "watchers": [
            {
                "id": "disconnect",
                "priority": 100,
                "patterns": [{"template": "reconnect_button", "threshold": 0.9}],
                "region": {"x": 0, "y": 0, "width": 800, "height": 600},
                "check_interval_ms": 1000
            }
        ]
    }"#;
    let cfg = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.settings().tick_interval, Duration::from_millis(250));
    assert_eq!(cfg.settings().probe_timeout, Duration::from_secs(5));
    assert_eq!(cfg.health.max_runtime_ms, Some(14_400_000));
    assert_eq!(cfg.health.to_policy().check_interval_ms, 2_000);

    let scan = cfg.tasks[0].to_spec();
    assert_eq!(scan.name, "Harbor scan");
    assert_eq!(scan.max_consecutive_failures, 3);
    assert!(scan.enabled);

    let spec = cfg.watchers[0].to_spec();
    assert_eq!(spec.check_interval, Duration::from_secs(1));
    assert_eq!(
        spec.region,
        Some(Region { x: 0, y: 0, width: 800, height: 600 })
    );
    assert!((spec.patterns[0].threshold - 0.9).abs() < f32::EPSILON);
}

#[test]
fn test_parse_errors_are_reported() {
    assert!(EngineConfig::from_json_str("{").unwrap_err().starts_with("parse error"));
    assert!(EngineConfig::from_file("/nonexistent/steward.json")
        .unwrap_err()
        .starts_with("cannot read"));
}

#[test]
fn test_file_and_env_overrides() {
    let path = std::env::temp_dir().join(format!("steward-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, r#"{"tick_interval_ms": 750, "tasks": [{"id": "scan", "priority": 10, "interval_ms": 1000}]}"#)
        .unwrap();

    std::env::set_var(CONFIG_PATH_ENV, &path);
    std::env::set_var(TICK_INTERVAL_ENV, "125");
    std::env::set_var(WATCHDOG_ENV, "not-a-number");
    let cfg = EngineConfig::from_env().unwrap();
    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var(TICK_INTERVAL_ENV);
    std::env::remove_var(WATCHDOG_ENV);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.tick_interval_ms, 125);
    assert_eq!(cfg.watchdog_ms, 60_000);
    assert_eq!(cfg.tasks.len(), 1);
}
