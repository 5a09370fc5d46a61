//! Builders to construct a scheduler from configuration.

pub mod engine_builder;

pub use engine_builder::build_scheduler;
