//! Repository traits consumed by sessions and trackers
//!
//! The sea-orm stores in this crate implement them; tests and alternative
//! backends can provide their own.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Conversation, Message, MessageCursor, MessageDraft, MessagePage, Participant, PresenceRecord,
    PresenceStatus, RowChange,
};

/// Conversations of one namespace and who belongs to them
#[async_trait]
pub trait ConversationCatalog: Send + Sync {
    async fn conversation_ids_for(&self, user_id: &str) -> Result<Vec<String>>;

    /// Conversations outside the namespace are skipped
    async fn conversations(&self, ids: &[String]) -> Result<Vec<Conversation>>;

    async fn participants(&self, conversation_ids: &[String]) -> Result<Vec<Participant>>;
}

/// Append-only message log of a conversation
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Validate and persist a new message
    async fn append(
        &self,
        conversation_id: &str,
        sender_id: &str,
        draft: MessageDraft,
    ) -> Result<Message>;

    /// Mark a message deleted. Only its sender may do so; repeating the call
    /// is a no-op that returns the already-deleted row.
    async fn soft_delete(&self, message_id: &str, requester_id: &str) -> Result<Message>;

    /// Up to `limit` non-deleted messages older than `before`, oldest first
    async fn page(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: u64,
    ) -> Result<MessagePage>;

    /// Rows touched at or after `since`, deleted ones included, oldest first
    async fn changes_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    /// Newest non-deleted message per conversation; conversations without
    /// one are absent
    async fn latest_for(&self, conversation_ids: &[String]) -> Result<HashMap<String, Message>>;
}

/// Per-participant read positions
#[async_trait]
pub trait ReadCursors: Send + Sync {
    /// Move the participant's `last_read_at` to `at` if that is later than
    /// the stored value. Returns whether the cursor moved.
    async fn advance(&self, conversation_id: &str, user_id: &str, at: DateTime<Utc>)
        -> Result<bool>;

    async fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64>;

    async fn unread_counts(
        &self,
        user_id: &str,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, u64>>;
}

/// Heartbeat-fed presence records
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn upsert(&self, user_id: &str, status: PresenceStatus) -> Result<PresenceRecord>;

    async fn get_many(&self, user_ids: &[String]) -> Result<Vec<PresenceRecord>>;
}

/// Receives every committed row change. The realtime backend plugs in here
/// the way a database replication feed would.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: RowChange);
}
