//! Job orchestrator

pub mod orchestrator;

pub use orchestrator::JobOrchestrator;
