//! Backend implementations.
//!
//! [`build`] is the factory called by the orchestrator for every backend
//! selection. Adding a backend = new module + new match arm.

pub mod echo;
pub mod http_inference;

use crate::language::Language;
use crate::llm::{BackendDescriptor, BackendError, BackendKind, LlmBackend};

/// Prompt-shaping inputs that come from the assistant, not the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptStyle {
    pub language: Language,
    /// Most recent turns included before the new message.
    pub context_turns: usize,
}

impl Default for PromptStyle {
    fn default() -> Self {
        Self { language: Language::default(), context_turns: 3 }
    }
}

/// Construct an uninitialized backend for `descriptor`.
///
/// Kinds without an implementation on this platform fail here with
/// [`BackendError::Unsupported`]; they are never swapped for another kind.
pub fn build(descriptor: &BackendDescriptor, style: PromptStyle) -> Result<LlmBackend, BackendError> {
    match descriptor.kind {
        BackendKind::HttpInference => Ok(LlmBackend::Http(
            http_inference::HttpInferenceBackend::new(descriptor, style)?,
        )),
        BackendKind::Echo => Ok(LlmBackend::Echo(echo::EchoBackend::new(descriptor.timing.chunk_delay))),
        BackendKind::OnDevice => Err(BackendError::Unsupported(format!(
            "{} inference is not available on this platform",
            descriptor.kind
        ))),
    }
}
