//! Subscription topics and their predicates

use std::fmt;
use std::sync::Arc;

use tidings_store::RowChange;

/// Caller-supplied predicate applied after the topic's own predicate
pub type ChangeFilter = Arc<dyn Fn(&RowChange) -> bool + Send + Sync>;

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inserts and soft deletes of messages in one conversation
    Conversation(String),
    /// New-message notifications for a user's conversation list.
    ///
    /// The topic itself passes every message change plus the user's own
    /// participant rows; narrowing to the user's conversations is the job
    /// of the subscription filter.
    Inbox(String),
    /// Presence upserts of every user
    Presence,
}

impl Topic {
    /// Base predicate of the topic
    pub fn matches(&self, change: &RowChange) -> bool {
        match (self, change) {
            (
                Topic::Conversation(id),
                RowChange::MessageInserted(m) | RowChange::MessageUpdated(m),
            ) => &m.conversation_id == id,
            (Topic::Inbox(_), RowChange::MessageInserted(_) | RowChange::MessageUpdated(_)) => {
                true
            }
            (Topic::Inbox(user_id), RowChange::ParticipantAdded(p)) => &p.user_id == user_id,
            (Topic::Presence, RowChange::PresenceUpserted(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Conversation(id) => write!(f, "conversation:{}", id),
            Topic::Inbox(user_id) => write!(f, "inbox:{}", user_id),
            Topic::Presence => write!(f, "presence"),
        }
    }
}
