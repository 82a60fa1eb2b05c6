//! Timeline - reconciles optimistic sends with confirmed rows
//!
//! A message can be confirmed twice: once by the append response and once by
//! the realtime echo of the same insert. Both carry the client-generated
//! correlation id (`client_ref`), so the timeline folds them into a single
//! Confirmed entry regardless of which arrives first.
//!
//! Confirmed messages are ordered by `(created_at, id)`. Local entries
//! (Pending or Failed) stay right after the confirmed message that was newest
//! when they were created, in creation order, until they are confirmed.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidings_store::{Message, MessageCursor, MessageDraft, MessagePage, RowChange};

/// A send that has not been confirmed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMessage {
    pub correlation_id: String,
    pub sender_id: String,
    pub draft: MessageDraft,
    pub created_at: DateTime<Utc>,
}

/// One visible timeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimelineEntry {
    Pending(LocalMessage),
    Confirmed(Message),
    Failed { local: LocalMessage, reason: String },
}

impl TimelineEntry {
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            TimelineEntry::Pending(local) | TimelineEntry::Failed { local, .. } => {
                Some(&local.correlation_id)
            }
            TimelineEntry::Confirmed(message) => message.client_ref.as_deref(),
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            TimelineEntry::Confirmed(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TimelineEntry::Pending(_))
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TimelineEntry::Confirmed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TimelineEntry::Failed { .. })
    }
}

/// Effect of folding a row into the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new confirmed entry became visible
    Inserted,
    /// An existing confirmed entry was replaced by a newer version
    Updated,
    /// A soft-deleted row was taken off the timeline
    Removed,
    /// Already known, nothing changed
    Duplicate,
    /// Not relevant to the loaded window
    Ignored,
}

#[derive(Debug, Clone)]
struct LocalEntry {
    message: LocalMessage,
    failure: Option<String>,
    anchor: Option<MessageCursor>,
    seq: u64,
}

/// Ordered, windowed view of one conversation
#[derive(Debug)]
pub struct Timeline {
    confirmed: BTreeMap<MessageCursor, Message>,
    by_id: HashMap<String, MessageCursor>,
    by_client_ref: HashMap<String, String>,
    local: HashMap<String, LocalEntry>,
    next_seq: u64,
    capacity: usize,
    older: Option<MessageCursor>,
    watermark: Option<DateTime<Utc>>,
}

impl Timeline {
    /// Empty timeline keeping at most `capacity` confirmed messages
    pub fn new(capacity: usize) -> Self {
        Self {
            confirmed: BTreeMap::new(),
            by_id: HashMap::new(),
            by_client_ref: HashMap::new(),
            local: HashMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            older: None,
            watermark: None,
        }
    }

    /// Number of visible entries
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor to page further back from, if older history exists
    pub fn older_cursor(&self) -> Option<&MessageCursor> {
        self.older.as_ref()
    }

    /// Newest `updated_at` among rows folded in so far
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub fn pending_count(&self) -> usize {
        self.local.values().filter(|e| e.failure.is_none()).count()
    }

    /// Add an optimistic entry at the current end of the timeline
    pub fn push_pending(&mut self, message: LocalMessage) {
        let anchor = self.confirmed.keys().next_back().cloned();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.local.insert(
            message.correlation_id.clone(),
            LocalEntry {
                message,
                failure: None,
                anchor,
                seq,
            },
        );
    }

    /// Flip a pending entry to Failed. Returns false when there is no
    /// pending entry for the id, e.g. because it was confirmed meanwhile.
    pub fn mark_failed(&mut self, correlation_id: &str, reason: impl Into<String>) -> bool {
        match self.local.get_mut(correlation_id) {
            Some(entry) if entry.failure.is_none() => {
                entry.failure = Some(reason.into());
                true
            }
            _ => false,
        }
    }

    /// Move a failed entry back to Pending, keeping its position, and return
    /// what has to be sent again
    pub fn retry(&mut self, correlation_id: &str) -> Option<LocalMessage> {
        match self.local.get_mut(correlation_id) {
            Some(entry) if entry.failure.is_some() => {
                entry.failure = None;
                Some(entry.message.clone())
            }
            _ => None,
        }
    }

    /// Drop a failed entry the user gave up on
    pub fn discard_failed(&mut self, correlation_id: &str) -> bool {
        if self
            .local
            .get(correlation_id)
            .is_some_and(|e| e.failure.is_some())
        {
            self.local.remove(correlation_id);
            return true;
        }
        false
    }

    /// Fold a realtime change into the timeline
    pub fn apply_change(&mut self, change: &RowChange) -> Applied {
        match change.message() {
            Some(message) => self.apply_message(message.clone()),
            None => Applied::Ignored,
        }
    }

    /// Fold a stored message row into the timeline
    pub fn apply_message(&mut self, message: Message) -> Applied {
        self.advance_watermark(message.updated_at);

        let settled = message
            .client_ref
            .as_deref()
            .is_some_and(|r| self.local.remove(r).is_some());

        if message.is_deleted() {
            return match self.remove_confirmed(&message.id) {
                true => Applied::Removed,
                false if settled => Applied::Removed,
                false => Applied::Ignored,
            };
        }

        if let Some(cursor) = self.by_id.get(&message.id).cloned() {
            let Some(existing) = self.confirmed.get_mut(&cursor) else {
                return Applied::Ignored;
            };
            if message.updated_at > existing.updated_at {
                *existing = message;
                return Applied::Updated;
            }
            return Applied::Duplicate;
        }

        // Rows older than the loaded window belong to unloaded history,
        // unless they answer a local entry of ours.
        if !settled {
            if let Some(oldest) = &self.older {
                if message.cursor() <= *oldest {
                    return Applied::Ignored;
                }
            }
        }

        self.insert_confirmed(message);
        self.evict_overflow();
        Applied::Inserted
    }

    /// Replace confirmed history with the newest page, keeping local entries
    pub fn load_latest(&mut self, page: MessagePage) {
        self.confirmed.clear();
        self.by_id.clear();
        self.by_client_ref.clear();
        self.older = page.older;
        for message in page.messages {
            self.advance_watermark(message.updated_at);
            if let Some(client_ref) = &message.client_ref {
                self.local.remove(client_ref);
            }
            self.insert_confirmed(message);
        }
        self.evict_overflow();
    }

    /// Add a page of older history in front of the loaded window
    pub fn prepend_older(&mut self, page: MessagePage) -> usize {
        let mut added = 0;
        for message in page.messages {
            if message.is_deleted() || self.by_id.contains_key(&message.id) {
                continue;
            }
            self.advance_watermark(message.updated_at);
            self.insert_confirmed(message);
            added += 1;
        }
        self.older = page.older;
        added
    }

    /// The entry a correlation id currently maps to
    pub fn entry(&self, correlation_id: &str) -> Option<TimelineEntry> {
        if let Some(entry) = self.local.get(correlation_id) {
            return Some(Self::local_view(entry));
        }
        let id = self.by_client_ref.get(correlation_id)?;
        let cursor = self.by_id.get(id)?;
        self.confirmed
            .get(cursor)
            .cloned()
            .map(TimelineEntry::Confirmed)
    }

    /// Visible entries in display order
    pub fn entries(&self) -> Vec<TimelineEntry> {
        let mut keyed: Vec<(Option<&MessageCursor>, u8, u64, TimelineEntry)> =
            Vec::with_capacity(self.len());

        for (cursor, message) in &self.confirmed {
            keyed.push((
                Some(cursor),
                0,
                0,
                TimelineEntry::Confirmed(message.clone()),
            ));
        }
        for entry in self.local.values() {
            keyed.push((entry.anchor.as_ref(), 1, entry.seq, Self::local_view(entry)));
        }

        keyed.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
        keyed.into_iter().map(|(_, _, _, entry)| entry).collect()
    }

    fn local_view(entry: &LocalEntry) -> TimelineEntry {
        match &entry.failure {
            None => TimelineEntry::Pending(entry.message.clone()),
            Some(reason) => TimelineEntry::Failed {
                local: entry.message.clone(),
                reason: reason.clone(),
            },
        }
    }

    fn insert_confirmed(&mut self, message: Message) {
        let cursor = message.cursor();
        self.by_id.insert(message.id.clone(), cursor.clone());
        if let Some(client_ref) = &message.client_ref {
            self.by_client_ref
                .insert(client_ref.clone(), message.id.clone());
        }
        self.confirmed.insert(cursor, message);
    }

    fn remove_confirmed(&mut self, message_id: &str) -> bool {
        let Some(cursor) = self.by_id.remove(message_id) else {
            return false;
        };
        if let Some(message) = self.confirmed.remove(&cursor) {
            if let Some(client_ref) = &message.client_ref {
                self.by_client_ref.remove(client_ref);
            }
        }
        true
    }

    fn evict_overflow(&mut self) {
        while self.confirmed.len() > self.capacity {
            let Some((cursor, message)) = self.confirmed.pop_first() else {
                break;
            };
            self.by_id.remove(&message.id);
            if let Some(client_ref) = &message.client_ref {
                self.by_client_ref.remove(client_ref);
            }
            // Evicted rows can be paged back in from the oldest kept one.
            self.older = self.confirmed.keys().next().cloned().or(Some(cursor));
        }
    }

    fn advance_watermark(&mut self, at: DateTime<Utc>) {
        if self.watermark.map_or(true, |w| at > w) {
            self.watermark = Some(at);
        }
    }
}
