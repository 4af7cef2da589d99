//! Data model shared across the interpreter, channel and orchestrator

pub mod job;
pub mod recording;
pub mod workflow;
