//! Workflow interpreter and its device-facing seams

pub mod device;
pub mod evaluate;
pub mod executor;
pub mod fsm;
pub mod outcome;
pub mod random;
pub mod services;
pub mod sink;
pub mod template;

pub use device::{DeviceActions, DeviceInspector, TransportActions};
pub use executor::{Executor, ExecutorOptions, RunContext};
pub use outcome::{RunOutcome, RunStatus};
pub use random::{RandomSource, SeededRandom};
pub use services::{ExternalServices, HttpServices};
pub use sink::{ChannelSink, MemorySink, StateSink, TracingSink};
