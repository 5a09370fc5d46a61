//! Error types for engine operations.

use thiserror::Error;

/// Errors produced by engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed validation; fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A task or watcher identifier was registered twice.
    #[error("duplicate identifier: {0}")]
    DuplicateId(String),
    /// No task or watcher carries this identifier.
    #[error("unknown identifier: {0}")]
    UnknownId(String),
    /// The arbitration lock was force-released while the unit still ran.
    #[error("arbitration lock revoked for {0}")]
    LockRevoked(String),
    /// The input actuator rejected or failed an action sequence.
    #[error("actuation failed: {0}")]
    Actuation(String),
    /// A unit of work or probe exceeded its time bound.
    #[error("timed out after {0} ms")]
    Timeout(u64),
    /// The unit of work was cancelled by an emergency stop or shutdown.
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// Collaborator-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for business logic.
pub type AppResult<T> = Result<T, anyhow::Error>;
