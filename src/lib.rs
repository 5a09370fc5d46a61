//! # Steward
//!
//! A scheduling and exception-arbitration engine for unattended desktop
//! automation.
//!
//! A single control loop decides, at every tick, which one unit of work may
//! drive the shared input device: a step of a recurring business task, an
//! exception handler reacting to something on screen, or a recovery action
//! restarting the target application. Work is serialized through an
//! arbitration lock, every unit is bounded by a watchdog, and control
//! commands from hotkeys or remote clients arrive through a non-blocking
//! inbox.
//!
//! ## Tick order
//!
//! 1. Control commands (an emergency stop overrides everything).
//! 2. Host health, with recovery preempting all other work.
//! 3. Exception watchers, preempting a running task of lower or equal priority.
//! 4. Tasks: continue the running pass or start the next due task.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steward::builders::build_scheduler;
//! use steward::config::EngineConfig;
//! use steward::core::{Collaborators, EngineError, TracingAuditSink};
//! use steward::infra::{CommandKind, ControlCommand};
//! use steward::runtime::EngineDriver;
//! use steward::util::clock::SystemClock;
//!
//! let cfg = EngineConfig::from_env()?;
//! let scheduler = build_scheduler(
//!     &cfg,
//!     |task| actions.get(&task.id).cloned().ok_or_else(|| EngineError::UnknownId(task.id.clone())),
//!     |watcher| handlers.get(&watcher.id).cloned().ok_or_else(|| EngineError::UnknownId(watcher.id.clone())),
//!     Collaborators { probe, detector, actuator, recovery, extension: None },
//!     Arc::new(SystemClock),
//!     Box::new(TracingAuditSink),
//! )?;
//! let engine = EngineDriver::current()?.spawn(scheduler);
//! engine.send(ControlCommand::new(CommandKind::PauseScheduler))?;
//! ```
//!
//! Business logic plugs in through [`core::TaskAction`],
//! [`core::WatcherHandler`], [`core::RecoveryAction`] and
//! [`core::CommandExtension`]; the screen and input device through
//! [`core::StatusProbe`], [`core::PatternDetector`] and
//! [`core::InputActuator`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Arbitration lock, registries, health state machine and the loop.
pub mod core;
/// Configuration models for timing, health, tasks and watchers.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Command inbox shared between producers and the loop.
pub mod infra;
/// Tokio driver and remote-control API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
