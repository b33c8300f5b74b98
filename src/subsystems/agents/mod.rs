//! Agents subsystem: turns user text into what the backend should answer.

pub mod intent;

pub use intent::{IntentRouter, MailIntent};
