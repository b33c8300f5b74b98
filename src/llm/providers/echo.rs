//! Echo backend: replies with the prompt prefixed by `[echo]`.
//! Runs the whole lifecycle without touching the network.

use std::time::Duration;

use crate::llm::lifecycle::Lifecycle;
use crate::llm::BackendError;
use crate::subsystems::memory::ConversationSession;

#[derive(Debug)]
pub struct EchoBackend {
    chunk_delay: Duration,
    lifecycle: Lifecycle,
}

impl EchoBackend {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay, lifecycle: Lifecycle::new() }
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn chunk_delay(&self) -> Duration {
        self.chunk_delay
    }

    pub async fn initialize(&self) -> Result<(), BackendError> {
        if self.lifecycle.needs_init() {
            self.lifecycle.mark_ready();
        }
        Ok(())
    }

    pub async fn generate(&self, message: &str, _context: &ConversationSession) -> Result<String, BackendError> {
        let _thinking = self.lifecycle.begin_generation()?;
        tokio::task::yield_now().await;
        Ok(format!("[echo] {message}"))
    }
}
