//! Application-wide error types.

use thiserror::Error;

use crate::llm::BackendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("mailbox error: {0}")]
    Mailbox(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
