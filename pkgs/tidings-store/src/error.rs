//! Error types for messaging storage operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur in directory, message, read-cursor and presence
/// operations
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Authentication required")]
    AuthRequired,
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Persistence error: {0}")]
    Persistence(DbErr),
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl MessagingError {
    /// Whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, MessagingError::Persistence(_))
    }
}

impl From<DbErr> for MessagingError {
    fn from(err: DbErr) -> Self {
        let message = err.to_string();
        if is_missing_schema(&message) {
            MessagingError::SchemaUnavailable(message)
        } else {
            MessagingError::Persistence(err)
        }
    }
}

fn is_missing_schema(message: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "no such table",
        "no such column",
        "has no column named",
        "no such function",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}

pub type Result<T> = std::result::Result<T, MessagingError>;
