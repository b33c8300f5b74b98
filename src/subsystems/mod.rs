//! Subsystem modules for the Orchid assistant.

pub mod agents;
pub mod comms;
pub mod memory;
pub mod tools;
pub mod voice;
