//! Error types for realtime subscriptions

use thiserror::Error;

/// Errors that can occur while subscribing or receiving changes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Realtime connection lost")]
    Disconnected,
    #[error("Realtime backend unavailable: {0}")]
    Unavailable(String),
    #[error("Catch-up fetch failed: {0}")]
    CatchUp(String),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
