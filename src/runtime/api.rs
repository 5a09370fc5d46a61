//! Remote-control request/response models.
//!
//! Transport-agnostic: a control server decodes a request body with
//! [`submit_command`] and renders [`EngineStatus`] with [`status_json`].

use serde::{Deserialize, Serialize};

use crate::core::{EngineStatus, HostStatus};
use crate::infra::{CommandKind, CommandSender, ControlCommand};

/// Acknowledgement for an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Sequence number stamped at enqueue.
    pub seq: u64,
    /// Kind accepted.
    pub kind: CommandKind,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Host operational and engine not globally paused.
    pub ok: bool,
    /// Current host status.
    pub host_status: HostStatus,
    /// Global pause in force.
    pub paused: bool,
}

/// Decode a JSON command body and enqueue it.
///
/// # Errors
///
/// Returns a message if the body does not parse or the inbox is gone.
pub fn submit_command(sender: &CommandSender, body: &str) -> Result<CommandAck, String> {
    let command = ControlCommand::from_json_str(body)?;
    let kind = command.kind;
    let seq = sender.send(command).map_err(|e| e.to_string())?;
    Ok(CommandAck { seq, kind })
}

/// Render a status snapshot as JSON.
///
/// # Errors
///
/// Returns a message if serialization fails.
pub fn status_json(status: &EngineStatus) -> Result<String, String> {
    serde_json::to_string(status).map_err(|e| format!("serialize error: {e}"))
}

/// Summarize a status snapshot for a liveness endpoint.
pub const fn health(status: &EngineStatus) -> Health {
    Health {
        ok: status.host_status.is_operational() && !status.pause.global,
        host_status: status.host_status,
        paused: status.pause.global,
    }
}
