//! Background workers

pub mod mqtt;
pub mod recorder;
