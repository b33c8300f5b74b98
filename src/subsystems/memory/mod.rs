//! Memory subsystem: the conversation ledger and its compaction policy.

pub mod session;
pub mod types;

pub use session::{ConversationSession, Speaker, Turn};
pub use types::MetaValue;

use crate::config::MemoryConfig;

/// How much history reaches the backend and when the live session is condensed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPolicy {
    /// Turns included in each prompt.
    pub context_turns: usize,
    pub compaction_threshold_tokens: usize,
    pub keep_turns: usize,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            context_turns: 3,
            compaction_threshold_tokens: session::DEFAULT_COMPACTION_THRESHOLD,
            keep_turns: session::DEFAULT_KEEP_TURNS,
        }
    }
}

impl From<&MemoryConfig> for MemoryPolicy {
    fn from(c: &MemoryConfig) -> Self {
        Self {
            context_turns: c.context_turns,
            compaction_threshold_tokens: c.compaction_threshold_tokens,
            keep_turns: c.keep_turns,
        }
    }
}

impl MemoryPolicy {
    /// Compact `session` if it has grown past the threshold.
    pub fn apply(&self, session: ConversationSession) -> ConversationSession {
        if session.needs_compaction(self.compaction_threshold_tokens) {
            let before = session.len();
            let condensed = session.compacted(self.keep_turns);
            tracing::debug!(
                session_id = %condensed.id(),
                before,
                after = condensed.len(),
                "session compacted"
            );
            condensed
        } else {
            session
        }
    }
}
