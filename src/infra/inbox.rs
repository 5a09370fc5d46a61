//! Command inbox: the only channel between control producers and the loop.
//!
//! Hotkey listeners and remote-control clients hold cloneable
//! [`CommandSender`]s and never touch the lock or the registries. Sending
//! never blocks. The scheduler drains the inbox once per tick; every command
//! is observed by exactly one drain, in the order it entered the channel.
//!
//! An `EmergencyStop` additionally bumps an epoch on a watch channel, so a
//! unit of work that is already running can be cancelled without waiting for
//! the next drain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::EngineError;

/// Fixed control vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Suspend all health, watcher and task work.
    Pause,
    /// Lift every pause flag.
    Resume,
    /// Stop selecting tasks.
    PauseScheduler,
    /// Resume selecting tasks.
    ResumeScheduler,
    /// Stop evaluating watchers.
    PauseDetection,
    /// Resume evaluating watchers.
    ResumeDetection,
    /// Cancel the in-flight unit, release the lock, pause everything.
    EmergencyStop,
    /// Make a task due immediately with a clean failure record.
    RestartTask,
    /// End the running (or targeted) task's pass without failure.
    SkipTask,
    /// Check every watcher and the host on the next tick.
    ForceRefresh,
    /// Enable a task or watcher by identifier.
    EnablePosition,
    /// Disable a task or watcher by identifier.
    DisablePosition,
    /// Unregister a task or watcher by identifier.
    RemoveById,
    /// Application-defined request handled by the command extension.
    Custom,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::PauseScheduler => "pause_scheduler",
            Self::ResumeScheduler => "resume_scheduler",
            Self::PauseDetection => "pause_detection",
            Self::ResumeDetection => "resume_detection",
            Self::EmergencyStop => "emergency_stop",
            Self::RestartTask => "restart_task",
            Self::SkipTask => "skip_task",
            Self::ForceRefresh => "force_refresh",
            Self::EnablePosition => "enable_position",
            Self::DisablePosition => "disable_position",
            Self::RemoveById => "remove_by_id",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// What to do.
    pub kind: CommandKind,
    /// Task or watcher identifier, when the kind takes one.
    #[serde(default)]
    pub target: Option<String>,
    /// Free-form argument, e.g. the text of a custom request.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Sequence number stamped at enqueue.
    #[serde(default)]
    pub seq: u64,
}

impl ControlCommand {
    /// Command without target or payload.
    pub const fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            target: None,
            payload: None,
            seq: 0,
        }
    }

    /// Command aimed at an identifier.
    pub fn targeting(kind: CommandKind, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(kind)
        }
    }

    /// Custom command carrying a payload.
    pub fn custom(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(CommandKind::Custom)
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode a command received over a control transport.
    ///
    /// # Errors
    ///
    /// Returns a message describing the parse failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))
    }

    /// Label for logs and events: `kind` or `kind(target)`.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{}({target})", self.kind),
            None => self.kind.to_string(),
        }
    }
}

/// A drained batch, with `EmergencyStop` already pulled to the front.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainedBatch {
    /// Nothing was pending.
    Empty,
    /// Commands to apply in enqueue order.
    Ordered(Vec<ControlCommand>),
    /// An emergency stop was present; everything else in the batch is dropped.
    Emergency {
        /// The first emergency stop in the batch.
        stop: ControlCommand,
        /// Commands short-circuited by the stop.
        discarded: Vec<ControlCommand>,
    },
}

impl DrainedBatch {
    fn from_commands(mut commands: Vec<ControlCommand>) -> Self {
        if commands.is_empty() {
            return Self::Empty;
        }
        let Some(pos) = commands
            .iter()
            .position(|c| c.kind == CommandKind::EmergencyStop)
        else {
            return Self::Ordered(commands);
        };
        let stop = commands.remove(pos);
        Self::Emergency {
            stop,
            discarded: commands,
        }
    }
}

/// Producer handle; clone one per producer thread.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<ControlCommand>,
    seq: Arc<AtomicU64>,
    emergency: Arc<watch::Sender<u64>>,
}

impl CommandSender {
    /// Enqueue a command; never blocks.
    ///
    /// Returns the sequence number stamped on the command.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Backend`] if the inbox has been dropped.
    pub fn send(&self, mut command: ControlCommand) -> Result<u64, EngineError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        command.seq = seq;
        let kind = command.kind;
        self.tx
            .send(command)
            .map_err(|_| EngineError::Backend("command inbox closed".into()))?;
        if kind == CommandKind::EmergencyStop {
            self.emergency.send_modify(|epoch| *epoch += 1);
            warn!(seq, "emergency stop enqueued");
        } else {
            debug!(seq, kind = %kind, "command enqueued");
        }
        Ok(seq)
    }
}

/// Receiving side of an emergency-stop epoch.
#[derive(Debug, Clone)]
pub struct EmergencySignal {
    rx: watch::Receiver<u64>,
}

impl EmergencySignal {
    /// Mark every stop raised so far as seen.
    pub fn acknowledge(&mut self) {
        self.rx.borrow_and_update();
    }

    /// True if a stop was raised since the last acknowledgement.
    pub fn is_raised(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Resolve once a stop is raised after the last acknowledgement.
    pub async fn raised(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Multi-producer, single-consumer command queue.
#[derive(Debug)]
pub struct CommandInbox {
    sender: CommandSender,
    rx: Receiver<ControlCommand>,
    emergency_rx: watch::Receiver<u64>,
}

impl Default for CommandInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandInbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let (emergency_tx, emergency_rx) = watch::channel(0_u64);
        Self {
            sender: CommandSender {
                tx,
                seq: Arc::new(AtomicU64::new(0)),
                emergency: Arc::new(emergency_tx),
            },
            rx,
            emergency_rx,
        }
    }

    /// A new producer handle.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Enqueue from the owning side.
    ///
    /// # Errors
    ///
    /// Propagates [`CommandSender::send`] errors.
    pub fn enqueue(&self, command: ControlCommand) -> Result<u64, EngineError> {
        self.sender.send(command)
    }

    /// Everything accumulated since the last drain, in enqueue order.
    pub fn drain_all(&self) -> Vec<ControlCommand> {
        self.rx.try_iter().collect()
    }

    /// Drain and pull any emergency stop to the front.
    pub fn drain_batch(&self) -> DrainedBatch {
        DrainedBatch::from_commands(self.drain_all())
    }

    /// Commands waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no command is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Subscribe to emergency stops, starting from the current epoch.
    pub fn emergency_signal(&self) -> EmergencySignal {
        let mut rx = self.emergency_rx.clone();
        rx.borrow_and_update();
        EmergencySignal { rx }
    }
}
