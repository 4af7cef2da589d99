//! Local storage

pub mod layout;
pub mod settings;
pub mod workflows;
