pub mod client;
pub mod collections;
pub mod devices;
pub mod jobs;
pub mod workflows;
