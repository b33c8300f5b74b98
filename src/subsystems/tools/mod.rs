//! Tools subsystem: read-only data sources the assistant can consult.

pub mod mailbox;

pub use mailbox::{Attachment, InMemoryMailbox, Mailbox, MailboxRecord};
