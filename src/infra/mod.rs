//! Infrastructure adapters: the command inbox fed by external producers.

pub mod inbox;

pub use inbox::{
    CommandInbox, CommandKind, CommandSender, ControlCommand, DrainedBatch, EmergencySignal,
};
