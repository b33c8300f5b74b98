//! Conversation ledger: immutable turns in persistent sessions.
//!
//! A [`ConversationSession`] is a value: [`append`](ConversationSession::append)
//! and [`compacted`](ConversationSession::compacted) return a new session and
//! never touch the receiver. The orchestrator swaps whole values in and out of
//! its live slot, so a reader holding an older snapshot never observes a
//! half-applied change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::MetaValue;

/// Compaction kicks in above this many estimated tokens.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1500;
/// Turns retained by a compaction.
pub const DEFAULT_KEEP_TURNS: usize = 6;

pub const META_CONDENSED: &str = "condensed";
pub const META_ORIGINAL_TURN_COUNT: &str = "original_turn_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => f.write_str("user"),
            Speaker::Assistant => f.write_str("assistant"),
        }
    }
}

/// One utterance. Fields are private so a turn cannot change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    speaker: Speaker,
    text: String,
    created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self { speaker, text: text.into(), created_at: Utc::now() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text)
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    id: String,
    started_at: DateTime<Utc>,
    /// Shared so that `append`/`compacted` copy pointers, not strings.
    turns: Vec<Arc<Turn>>,
    metadata: HashMap<String, MetaValue>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    /// Fresh session with a new id and the current time as its start.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            turns: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Fresh session seeded with caller-supplied history.
    pub fn from_turns<I>(turns: I) -> Self
    where
        I: IntoIterator<Item = Turn>,
    {
        Self {
            turns: turns.into_iter().map(Arc::new).collect(),
            ..Self::new()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn turns(&self) -> impl ExactSizeIterator<Item = &Turn> + DoubleEndedIterator {
        self.turns.iter().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn metadata(&self) -> &HashMap<String, MetaValue> {
        &self.metadata
    }

    /// `true` once this session (or an ancestor) has been compacted.
    pub fn is_condensed(&self) -> bool {
        self.metadata
            .get(META_CONDENSED)
            .and_then(MetaValue::as_bool)
            .unwrap_or(false)
    }

    /// The last `max_turns` turns, oldest first.
    pub fn recent(&self, max_turns: usize) -> Vec<&Turn> {
        let start = self.turns.len().saturating_sub(max_turns);
        self.turns[start..].iter().map(|t| t.as_ref()).collect()
    }

    /// 0.75 × whitespace-delimited words across all turns, rounded.
    pub fn estimated_tokens(&self) -> usize {
        let words: usize = self.turns.iter().map(|t| t.word_count()).sum();
        (words as f64 * 0.75).round() as usize
    }

    pub fn needs_compaction(&self, threshold_tokens: usize) -> bool {
        self.estimated_tokens() > threshold_tokens
    }

    /// Same id and start time, only the last `keep_turns` turns, flagged
    /// `condensed` with the pre-compaction turn count recorded.
    pub fn compacted(&self, keep_turns: usize) -> ConversationSession {
        let start = self.turns.len().saturating_sub(keep_turns);
        let mut metadata = self.metadata.clone();
        metadata.insert(META_CONDENSED.to_string(), MetaValue::Bool(true));
        metadata.insert(META_ORIGINAL_TURN_COUNT.to_string(), self.turns.len().into());
        ConversationSession {
            id: self.id.clone(),
            started_at: self.started_at,
            turns: self.turns[start..].to_vec(),
            metadata,
        }
    }

    pub fn append(&self, turn: Turn) -> ConversationSession {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        turns.extend(self.turns.iter().cloned());
        turns.push(Arc::new(turn));
        ConversationSession {
            id: self.id.clone(),
            started_at: self.started_at,
            turns,
            metadata: self.metadata.clone(),
        }
    }

    /// Render as Markdown, one `### {speaker} — {timestamp}` block per turn.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for t in &self.turns {
            out.push_str(&format!(
                "### {} — {}\n\n{}\n\n",
                t.speaker,
                t.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                t.text.trim()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_of(n: usize, words_per_turn: usize) -> ConversationSession {
        let text = vec!["mot"; words_per_turn].join(" ");
        (0..n).fold(ConversationSession::new(), |s, i| {
            let turn = if i % 2 == 0 { Turn::user(&text) } else { Turn::assistant(&text) };
            s.append(turn)
        })
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let s = ConversationSession::new()
            .append(Turn::user("un"))
            .append(Turn::assistant("deux"))
            .append(Turn::user("trois"));
        let texts: Vec<_> = s.recent(2).iter().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["deux", "trois"]);
        assert_eq!(s.recent(10).len(), 3);
        assert!(s.recent(0).is_empty());
    }

    #[test]
    fn append_then_recent_one_is_the_turn() {
        let s = session_of(4, 3);
        let turn = Turn::user("bonjour");
        let next = s.append(turn.clone());
        assert_eq!(next.recent(1).last().copied(), Some(&turn));
    }

    #[test]
    fn append_leaves_source_untouched() {
        let s = session_of(2, 1);
        let next = s.append(Turn::user("encore"));
        assert_eq!(s.len(), 2);
        assert_eq!(next.len(), 3);
        assert_eq!(s.id(), next.id());
    }

    #[test]
    fn token_estimate_rounds() {
        let s = ConversationSession::new().append(Turn::user("a b"));
        // 2 words × 0.75 = 1.5 → 2
        assert_eq!(s.estimated_tokens(), 2);
        let s = s.append(Turn::assistant("  c \n d\te  "));
        // 5 words × 0.75 = 3.75 → 4
        assert_eq!(s.estimated_tokens(), 4);
        assert_eq!(ConversationSession::new().estimated_tokens(), 0);
    }

    #[test]
    fn needs_compaction_threshold() {
        // 20 turns × 100 words = 2000 words → 1500 tokens, not above.
        let s = session_of(20, 100);
        assert_eq!(s.estimated_tokens(), 1500);
        assert!(!s.needs_compaction(DEFAULT_COMPACTION_THRESHOLD));
        let s = s.append(Turn::user("un de plus"));
        assert!(s.needs_compaction(DEFAULT_COMPACTION_THRESHOLD));
    }

    #[test]
    fn needs_compaction_is_monotonic_under_append() {
        let mut s = ConversationSession::new();
        let mut seen_true = false;
        for i in 0..60 {
            s = s.append(Turn::user(format!("tour {i} avec quelques mots de plus pour remplir")));
            let now = s.needs_compaction(50);
            assert!(!(seen_true && !now), "flipped back to false at turn {i}");
            seen_true |= now;
        }
        assert!(seen_true);
    }

    #[test]
    fn compacted_keeps_identity_and_order() {
        let s = (0..10).fold(ConversationSession::new(), |s, i| {
            s.append(Turn::user(format!("message {i}")))
        });
        let c = s.compacted(DEFAULT_KEEP_TURNS);
        assert_eq!(c.len(), 6);
        assert_eq!(c.id(), s.id());
        assert_eq!(c.started_at(), s.started_at());
        let texts: Vec<_> = c.turns().map(|t| t.text().to_string()).collect();
        assert_eq!(texts, (4..10).map(|i| format!("message {i}")).collect::<Vec<_>>());
        assert!(c.is_condensed());
        assert_eq!(c.metadata()[META_ORIGINAL_TURN_COUNT], MetaValue::Int(10));
        // source untouched
        assert_eq!(s.len(), 10);
        assert!(!s.is_condensed());
    }

    #[test]
    fn compacted_smaller_than_keep() {
        let s = session_of(3, 2);
        let c = s.compacted(6);
        assert_eq!(c.len(), 3);
        assert!(c.is_condensed());
        assert_eq!(s.compacted(0).len(), 0);
    }

    #[test]
    fn from_turns_gets_new_identity() {
        let a = ConversationSession::from_turns(vec![Turn::user("x"), Turn::assistant("y")]);
        let b = ConversationSession::new();
        assert_eq!(a.len(), 2);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn markdown_blocks() {
        let s = ConversationSession::new()
            .append(Turn::user("Salut"))
            .append(Turn::assistant("Bonjour !"));
        let md = s.to_markdown();
        assert!(md.starts_with("### user — "));
        assert!(md.contains("### assistant — "));
        assert!(md.contains("\n\nBonjour !\n\n"));
    }
}
