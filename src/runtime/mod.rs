//! Tokio driver for the loop and the remote-control API surface.

pub mod api;
pub mod driver;

pub use api::{health, status_json, submit_command, CommandAck, Health};
pub use driver::{EngineDriver, EngineHandle};
