//! Read-only mailbox store queried by the intent router.
//!
//! The core only ever reads through [`Mailbox`]; [`InMemoryMailbox`] is the
//! stock implementation, loaded from a JSON fixture at startup.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Display name of the sender.
    pub sender_name: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl MailboxRecord {
    fn matches(&self, needle_lower: &str) -> bool {
        self.sender_name.to_lowercase().contains(needle_lower)
            || self.subject.to_lowercase().contains(needle_lower)
            || self.body.to_lowercase().contains(needle_lower)
    }
}

/// Narrow query capability over the document store.
pub trait Mailbox: Send + Sync {
    fn total_count(&self) -> usize;

    fn unread_count(&self) -> usize;

    /// Most recently received record, if any.
    fn latest(&self) -> Option<MailboxRecord>;

    /// Case-insensitive substring match over sender name, subject and body,
    /// newest first.
    fn search(&self, keyword: &str) -> Vec<MailboxRecord>;

    /// Unread records, newest first.
    fn unread(&self) -> Vec<MailboxRecord>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    /// Kept sorted newest first.
    records: Vec<MailboxRecord>,
}

impl InMemoryMailbox {
    pub fn new(mut records: Vec<MailboxRecord>) -> Self {
        records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Self { records }
    }

    /// Load a JSON array of records.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Mailbox(format!("cannot read {}: {e}", path.display())))?;
        let records: Vec<MailboxRecord> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Mailbox(format!("malformed {}: {e}", path.display())))?;
        debug!(path = %path.display(), records = records.len(), "mailbox fixture loaded");
        Ok(Self::new(records))
    }
}

impl Mailbox for InMemoryMailbox {
    fn total_count(&self) -> usize {
        self.records.len()
    }

    fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_read).count()
    }

    fn latest(&self) -> Option<MailboxRecord> {
        self.records.first().cloned()
    }

    fn search(&self, keyword: &str) -> Vec<MailboxRecord> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.records.iter().filter(|r| r.matches(&needle)).cloned().collect()
    }

    fn unread(&self) -> Vec<MailboxRecord> {
        self.records.iter().filter(|r| !r.is_read).cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;

    pub fn record(id: &str, name: &str, subject: &str, body: &str, day: u32, is_read: bool) -> MailboxRecord {
        MailboxRecord {
            id: id.to_string(),
            sender: format!("{}@example.fr", name.to_lowercase()),
            sender_name: name.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap(),
            is_read,
            attachments: Vec::new(),
        }
    }

    pub fn sample() -> InMemoryMailbox {
        InMemoryMailbox::new(vec![
            record("1", "Marie", "Dîner samedi", "On se retrouve à 20h chez moi ?", 10, true),
            record("2", "Banque Postale", "Votre relevé", "Votre relevé de mars est disponible.", 12, false),
            record("3", "Paul", "Réunion projet", "La réunion est déplacée à jeudi.", 14, false),
        ])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::fixtures::{record, sample};
    use super::*;

    #[test]
    fn counts() {
        let m = sample();
        assert_eq!(m.total_count(), 3);
        assert_eq!(m.unread_count(), 2);
    }

    #[test]
    fn latest_is_newest_regardless_of_input_order() {
        let m = sample();
        assert_eq!(m.latest().unwrap().id, "3");
        assert!(InMemoryMailbox::default().latest().is_none());
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let m = sample();
        assert_eq!(m.search("MARIE").len(), 1);
        assert_eq!(m.search("relevé")[0].id, "2");
        assert_eq!(m.search("jeudi")[0].id, "3");
        assert!(m.search("inconnu").is_empty());
        assert!(m.search("   ").is_empty());
    }

    #[test]
    fn search_ignores_sender_address() {
        let m = InMemoryMailbox::new(vec![record("9", "Zoé", "Bonjour", "Salut", 1, true)]);
        assert!(m.search("example.fr").is_empty());
    }

    #[test]
    fn unread_newest_first() {
        let ids: Vec<_> = sample().unread().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn loads_json_fixture() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(
            br#"[{"id":"a","sender":"x@y.fr","sender_name":"X","subject":"S","body":"B",
                 "received_at":"2026-01-02T03:04:05Z"}]"#,
        )
        .unwrap();
        let m = InMemoryMailbox::from_json_file(f.path()).unwrap();
        assert_eq!(m.total_count(), 1);
        assert_eq!(m.unread_count(), 1);
    }

    #[test]
    fn malformed_fixture_errors() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"{not json").unwrap();
        let err = InMemoryMailbox::from_json_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("mailbox error"));
    }
}
