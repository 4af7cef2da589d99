//! tapflow library
//!
//! Workflow interpreter, device command channel and job orchestration for
//! remote Android automation agents.

pub mod app;
pub mod channel;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod graph;
pub mod http;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod recording;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
