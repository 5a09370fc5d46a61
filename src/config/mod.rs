//! Configuration models for the engine, its tasks, watchers and health policy.

pub mod engine;

pub use engine::{
    EngineConfig, HealthConfig, PatternConfig, TaskConfig, WatcherConfig, CONFIG_PATH_ENV,
    TICK_INTERVAL_ENV, WATCHDOG_ENV,
};
