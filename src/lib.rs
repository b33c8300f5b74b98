//! Orchid, a conversational assistant core.
//!
//! [`orchestrator::Orchestrator`] ties together an LLM backend
//! ([`llm`]), the conversation ledger ([`subsystems::memory`]) and the
//! mailbox intent router ([`subsystems::agents`]).

pub mod config;
pub mod error;
pub mod language;
pub mod llm;
pub mod logger;
pub mod orchestrator;
pub mod subsystems;
