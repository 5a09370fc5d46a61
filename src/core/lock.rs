//! Action arbitration lock.
//!
//! A binary token over the physical input device. Exactly one logical actor
//! (a task step, a watcher handler, a recovery action or a manual override)
//! holds it for the duration of one unit of work. Ownership is represented by
//! an RAII [`ArbitrationGuard`]; the input device is only reachable through a
//! handle built from a live guard (see [`crate::core::InputHandle`]).
//!
//! The lock is inspectable ([`ArbitrationLock::holder`]) and can be forcibly
//! released by the watchdog or an emergency stop. Each grant carries a
//! generation number, so a guard that outlived a forced release is stale: it
//! can no longer actuate, and dropping it does not release the next holder.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::EngineError;

/// Logical actor holding the arbitration lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LockOwner {
    /// A scheduled task step.
    Task(String),
    /// An exception watcher handler.
    Watcher(String),
    /// A host recovery action, identified by the status that triggered it.
    Recovery(String),
    /// A manual override issued through a control command.
    Manual(String),
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::Watcher(id) => write!(f, "watcher:{id}"),
            Self::Recovery(id) => write!(f, "recovery:{id}"),
            Self::Manual(id) => write!(f, "manual:{id}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Holder {
    owner: LockOwner,
    generation: u64,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<Holder>,
    generation: u64,
}

/// Exclusive-access token over the input device.
#[derive(Debug, Default)]
pub struct ArbitrationLock {
    state: Mutex<LockState>,
    released: Notify,
}

impl ArbitrationLock {
    /// Create a new, unheld lock behind an `Arc` (guards keep a reference).
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Grant the lock to `owner` if nobody holds it.
    pub fn try_acquire(self: &Arc<Self>, owner: LockOwner) -> Option<ArbitrationGuard> {
        let mut state = self.state.lock();
        if state.holder.is_some() {
            return None;
        }
        state.generation += 1;
        let generation = state.generation;
        state.holder = Some(Holder {
            owner: owner.clone(),
            generation,
            acquired_at: Instant::now(),
        });
        drop(state);

        debug!(owner = %owner, generation, "arbitration lock acquired");
        Some(ArbitrationGuard {
            lock: Arc::clone(self),
            owner,
            generation,
        })
    }

    /// Wait until the lock is free, then grant it to `owner`.
    pub async fn acquire(self: &Arc<Self>, owner: LockOwner) -> ArbitrationGuard {
        loop {
            // Register interest before checking so a release in between is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire(owner.clone()) {
                return guard;
            }
            notified.await;
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<LockOwner> {
        self.state.lock().holder.as_ref().map(|h| h.owner.clone())
    }

    /// Whether any actor holds the lock.
    pub fn is_held(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// How long the current holder has owned the lock.
    pub fn held_for(&self) -> Option<Duration> {
        self.state
            .lock()
            .holder
            .as_ref()
            .map(|h| h.acquired_at.elapsed())
    }

    /// Revoke the current grant regardless of its guard.
    ///
    /// Returns the evicted owner. The outstanding guard becomes stale.
    pub fn force_release(&self) -> Option<LockOwner> {
        let evicted = self.state.lock().holder.take();
        if let Some(holder) = &evicted {
            warn!(
                owner = %holder.owner,
                held_ms = holder.acquired_at.elapsed().as_millis(),
                "arbitration lock force-released"
            );
            self.released.notify_waiters();
        }
        evicted.map(|h| h.owner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state
            .lock()
            .holder
            .as_ref()
            .is_some_and(|h| h.generation == generation)
    }

    fn release(&self, generation: u64) {
        let mut state = self.state.lock();
        let matches = state
            .holder
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if matches {
            let holder = state.holder.take();
            drop(state);
            if let Some(holder) = holder {
                debug!(owner = %holder.owner, generation, "arbitration lock released");
            }
            self.released.notify_waiters();
        }
    }
}

/// Proof of ownership of the arbitration lock; releases on drop.
#[derive(Debug)]
pub struct ArbitrationGuard {
    lock: Arc<ArbitrationLock>,
    owner: LockOwner,
    generation: u64,
}

impl ArbitrationGuard {
    /// The actor this grant was issued to.
    pub const fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// False once the grant has been force-released.
    pub fn is_valid(&self) -> bool {
        self.lock.is_current(self.generation)
    }

    /// Error unless this guard still owns the lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LockRevoked`] for a stale guard.
    pub fn ensure_held(&self) -> Result<(), EngineError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(EngineError::LockRevoked(self.owner.to_string()))
        }
    }
}

impl Drop for ArbitrationGuard {
    fn drop(&mut self) {
        self.lock.release(self.generation);
    }
}
