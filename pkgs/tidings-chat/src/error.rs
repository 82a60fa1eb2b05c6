//! Error types for chat sessions and the messenger facade

use thiserror::Error;
use tidings_realtime::RealtimeError;
use tidings_store::MessagingError;

/// Errors surfaced by chat operations
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error("Blob upload failed: {0}")]
    Blob(String),
    #[error("Profile lookup failed: {0}")]
    Profile(String),
    #[error("No failed entry with correlation id {0}")]
    UnknownEntry(String),
}

impl ChatError {
    /// Whether the operation needs a signed-in actor
    pub fn is_auth_required(&self) -> bool {
        matches!(self, ChatError::Messaging(MessagingError::AuthRequired))
    }

    /// Whether the draft itself was rejected
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Messaging(MessagingError::Validation(_)))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
