//! Conversation list - one summary per conversation of a user

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tidings_realtime::{CatchUp, ChangeFilter, RealtimeError};
use tidings_store::{
    Conversation, ConversationCatalog, Message, MessageLog, ReadCursors, RowChange,
};
use tracing::{debug, info, warn};

use crate::collaborators::{Profile, ProfileDirectory};
use crate::error::Result;

/// One row of a user's conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// The other participant of a direct conversation
    pub peer_id: Option<String>,
    pub peer: Option<Profile>,
    /// Newest message that is not deleted
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

/// Result of folding a live change into loaded summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListUpdate {
    Applied,
    Unchanged,
    /// The change cannot be folded in locally; load the list again
    ReloadNeeded,
}

/// Builds conversation lists from the stores
pub struct ConversationListAggregator {
    directory: Arc<dyn ConversationCatalog>,
    messages: Arc<dyn MessageLog>,
    read_cursors: Arc<dyn ReadCursors>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl ConversationListAggregator {
    pub fn new(
        directory: Arc<dyn ConversationCatalog>,
        messages: Arc<dyn MessageLog>,
        read_cursors: Arc<dyn ReadCursors>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            directory,
            messages,
            read_cursors,
            profiles,
        }
    }

    /// All conversations of `user_id`, most recently active first
    pub async fn load(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let ids = self.directory.conversation_ids_for(user_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (conversations, participants, mut latest, unread) = futures::try_join!(
            self.directory.conversations(&ids),
            self.directory.participants(&ids),
            self.messages.latest_for(&ids),
            self.read_cursors.unread_counts(user_id, &ids),
        )?;

        let mut peers: HashMap<String, String> = HashMap::new();
        for participant in participants {
            if participant.user_id != user_id {
                peers
                    .entry(participant.conversation_id)
                    .or_insert(participant.user_id);
            }
        }

        let peer_ids: Vec<String> = peers
            .values()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = match self.profiles.profiles(&peer_ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!("Profile lookup for conversation list failed: {}", e);
                HashMap::new()
            }
        };

        let mut summaries: Vec<ConversationSummary> = conversations
            .into_iter()
            .map(|conversation| {
                let peer_id = peers.get(&conversation.id).cloned();
                ConversationSummary {
                    peer: peer_id.as_ref().and_then(|id| profiles.get(id).cloned()),
                    peer_id,
                    last_message: latest.remove(&conversation.id),
                    unread_count: unread.get(&conversation.id).copied().unwrap_or(0),
                    conversation,
                }
            })
            .collect();

        sort_summaries(&mut summaries);
        debug!(
            "Loaded {} conversation(s) for {}",
            summaries.len(),
            user_id
        );
        Ok(summaries)
    }
}

/// Fold a live inbox change into `summaries` loaded for `user_id`
pub fn apply_change(
    user_id: &str,
    summaries: &mut [ConversationSummary],
    change: &RowChange,
) -> ListUpdate {
    match change {
        RowChange::ParticipantAdded(participant) => {
            let known = summaries
                .iter()
                .any(|s| s.conversation.id == participant.conversation_id);
            if participant.user_id == user_id && !known {
                ListUpdate::ReloadNeeded
            } else {
                ListUpdate::Unchanged
            }
        }
        RowChange::MessageInserted(message) => {
            let Some(summary) = summaries
                .iter_mut()
                .find(|s| s.conversation.id == message.conversation_id)
            else {
                return ListUpdate::ReloadNeeded;
            };

            // Redelivered or older rows must not count twice
            let newer = summary
                .last_message
                .as_ref()
                .map_or(true, |last| message.cursor() > last.cursor());
            if !newer {
                return ListUpdate::Unchanged;
            }

            summary.last_message = Some(message.clone());
            if message.created_at > summary.conversation.updated_at {
                summary.conversation.updated_at = message.created_at;
            }
            if message.sender_id != user_id {
                summary.unread_count += 1;
            }
            sort_summaries(summaries);
            ListUpdate::Applied
        }
        RowChange::MessageUpdated(message) => {
            if !message.is_deleted() {
                return ListUpdate::Unchanged;
            }
            let Some(summary) = summaries
                .iter()
                .find(|s| s.conversation.id == message.conversation_id)
            else {
                return ListUpdate::Unchanged;
            };

            let was_preview = summary
                .last_message
                .as_ref()
                .is_some_and(|last| last.id == message.id);
            let may_be_unread = message.sender_id != user_id && summary.unread_count > 0;
            if was_preview || may_be_unread {
                ListUpdate::ReloadNeeded
            } else {
                ListUpdate::Unchanged
            }
        }
        RowChange::PresenceUpserted(_) => ListUpdate::Unchanged,
    }
}

/// Most recently updated first, ties broken by id for a stable order
pub fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| {
        b.conversation
            .updated_at
            .cmp(&a.conversation.updated_at)
            .then_with(|| a.conversation.id.cmp(&b.conversation.id))
    });
}

/// Conversations a user belongs to, shared by the inbox filter and its
/// catch-up source.
///
/// Starts from the conversations known when the inbox opened and learns
/// newer ones from the user's own participant rows, which are published
/// before any message of the new conversation. After a reconnect the
/// catch-up re-reads the membership from the store, since rows published
/// during the outage never reached the filter.
#[derive(Clone)]
pub struct InboxMembership {
    user_id: String,
    members: Arc<Mutex<HashSet<String>>>,
}

impl InboxMembership {
    pub fn new(user_id: impl Into<String>, known: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id: user_id.into(),
            members: Arc::new(Mutex::new(known.into_iter().collect())),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.members.lock().contains(conversation_id)
    }

    /// Add `conversation_ids`, returning the ones that were not known yet
    pub fn admit(&self, conversation_ids: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut members = self.members.lock();
        conversation_ids
            .into_iter()
            .filter(|id| members.insert(id.clone()))
            .collect()
    }

    /// Filter passing the user's own participant rows and the message rows
    /// of member conversations
    pub fn filter(&self) -> ChangeFilter {
        let membership = self.clone();
        Arc::new(move |change: &RowChange| match change {
            RowChange::ParticipantAdded(p) if p.user_id == membership.user_id => {
                membership.admit([p.conversation_id.clone()]);
                true
            }
            RowChange::MessageInserted(m) | RowChange::MessageUpdated(m) => {
                membership.contains(&m.conversation_id)
            }
            _ => false,
        })
    }
}

/// Replays what an inbox missed while disconnected.
///
/// Conversations created during the outage are admitted into the membership
/// and announced with the user's participant row; message rows of every
/// member conversation touched since the watermark follow, oldest first.
pub struct InboxCatchUp {
    membership: InboxMembership,
    directory: Arc<dyn ConversationCatalog>,
    log: Arc<dyn MessageLog>,
}

impl InboxCatchUp {
    pub fn new(
        membership: InboxMembership,
        directory: Arc<dyn ConversationCatalog>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        Self {
            membership,
            directory,
            log,
        }
    }

    async fn missed(&self, since: DateTime<Utc>) -> tidings_store::Result<Vec<RowChange>> {
        let user_id = self.membership.user_id();
        let ids = self.directory.conversation_ids_for(user_id).await?;

        let learned = self.membership.admit(ids.iter().cloned());
        let mut changes: Vec<RowChange> = Vec::new();
        if !learned.is_empty() {
            info!(
                "Inbox of {} learned {} conversation(s) on catch-up",
                user_id,
                learned.len()
            );
            changes.extend(
                self.directory
                    .participants(&learned)
                    .await?
                    .into_iter()
                    .filter(|p| p.user_id == user_id)
                    .map(RowChange::ParticipantAdded),
            );
        }

        let mut messages: Vec<Message> =
            try_join_all(ids.iter().map(|id| self.log.changes_since(id, since)))
                .await?
                .into_iter()
                .flatten()
                .collect();
        messages.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.cursor().cmp(&b.cursor()))
        });
        changes.extend(messages.into_iter().map(RowChange::from_message));

        Ok(changes)
    }
}

#[async_trait]
impl CatchUp for InboxCatchUp {
    async fn changes_since(
        &self,
        since: DateTime<Utc>,
    ) -> tidings_realtime::Result<Vec<RowChange>> {
        self.missed(since)
            .await
            .map_err(|e| RealtimeError::CatchUp(e.to_string()))
    }
}
