//! Run a scheduler on a tokio runtime and control it from outside.

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::{EngineError, EngineStatus, Scheduler};
use crate::infra::{CommandSender, ControlCommand};

/// Spawns scheduler loops onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct EngineDriver {
    handle: Handle,
}

impl EngineDriver {
    /// Driver for the given runtime.
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Driver for the runtime this call is made from.
    ///
    /// # Errors
    ///
    /// [`EngineError::Backend`] outside a tokio runtime.
    pub fn current() -> Result<Self, EngineError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| EngineError::Backend(format!("no tokio runtime: {e}")))
    }

    /// Start the loop. The scheduler is handed back on shutdown.
    pub fn spawn(&self, mut scheduler: Scheduler) -> EngineHandle {
        let sender = scheduler.sender();
        let status = scheduler.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = self.handle.spawn(async move {
            scheduler.run(shutdown_rx).await;
            scheduler
        });
        info!("engine spawned");
        EngineHandle {
            sender,
            status,
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Control and observation handle for a running loop.
#[derive(Debug)]
pub struct EngineHandle {
    sender: CommandSender,
    status: watch::Receiver<EngineStatus>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Scheduler>,
}

impl EngineHandle {
    /// Producer handle for control commands.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Enqueue a command.
    ///
    /// # Errors
    ///
    /// Propagates [`CommandSender::send`] errors.
    pub fn send(&self, command: ControlCommand) -> Result<u64, EngineError> {
        self.sender.send(command)
    }

    /// Latest published status.
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status updates.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop, cancelling any unit in flight, and take the scheduler back.
    ///
    /// # Errors
    ///
    /// [`EngineError::Backend`] if the loop task panicked or was aborted.
    pub async fn shutdown(self) -> Result<Scheduler, EngineError> {
        self.shutdown.send_replace(true);
        self.join
            .await
            .map_err(|e| EngineError::Backend(format!("engine task failed: {e}")))
    }
}
