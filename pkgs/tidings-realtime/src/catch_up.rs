//! Catch-up sources backed by the message store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tidings_store::{MessageLog, RowChange};

use crate::channel::CatchUp;
use crate::error::{RealtimeError, Result};

/// Replays inserts and soft deletes of one conversation from the store
pub struct ConversationCatchUp {
    log: Arc<dyn MessageLog>,
    conversation_id: String,
}

impl ConversationCatchUp {
    pub fn new(log: Arc<dyn MessageLog>, conversation_id: impl Into<String>) -> Self {
        Self {
            log,
            conversation_id: conversation_id.into(),
        }
    }
}

#[async_trait]
impl CatchUp for ConversationCatchUp {
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<RowChange>> {
        let messages = self
            .log
            .changes_since(&self.conversation_id, since)
            .await
            .map_err(|e| RealtimeError::CatchUp(e.to_string()))?;
        Ok(messages.into_iter().map(RowChange::from_message).collect())
    }
}
