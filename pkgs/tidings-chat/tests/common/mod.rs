// Copyright 2026 Tidings Team.
//
// Shared fakes and helpers for tidings-chat integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use tempfile::NamedTempFile;
use tidings_chat::{
    ChatError, InMemoryBlobStorage, InMemoryProfiles, Messenger, MessengerConfig, Profile,
    ProfileDirectory, SessionConfig, SessionContext, StaticIdentity,
};
use tidings_realtime::{BackoffPolicy, RealtimeHub};
use tidings_store::{
    now_millis, ChangeSink, Conversation, ConversationCatalog, ConversationKind, Message,
    MessageCursor, MessageDraft, MessageLog, MessagePage, MessagingError, MessagingStores,
    Namespace, Participant, ParticipantRole, PresenceRecord, PresenceRepository, PresenceStatus,
    ReadCursors, RowChange, StoreConfig,
};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(3);

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        send_timeout: Duration::from_secs(2),
        backoff: fast_backoff(),
        ..Default::default()
    }
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true")
}

pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn backend_failure() -> MessagingError {
    MessagingError::Persistence(DbErr::Custom("backend offline".into()))
}

/// When the realtime echo of an append is published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Before the append returns
    BeforeResponse,
    /// After the append returned
    AfterResponse,
    /// Never
    Silent,
}

/// In-memory message log assigning ids `m-101`, `m-102`, …
pub struct FakeLog {
    conversation_id: String,
    rows: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    sink: Arc<dyn ChangeSink>,
    echo: Mutex<Echo>,
    response_delay: Mutex<Duration>,
    failures: AtomicU32,
    pub appends: AtomicUsize,
}

impl FakeLog {
    pub fn new(conversation_id: &str, sink: Arc<dyn ChangeSink>) -> Arc<Self> {
        Arc::new(Self {
            conversation_id: conversation_id.to_string(),
            rows: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(101),
            sink,
            echo: Mutex::new(Echo::BeforeResponse),
            response_delay: Mutex::new(Duration::ZERO),
            failures: AtomicU32::new(0),
            appends: AtomicUsize::new(0),
        })
    }

    pub fn set_echo(&self, echo: Echo) {
        *self.echo.lock().unwrap() = echo;
    }

    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock().unwrap() = delay;
    }

    /// Make the next `count` appends fail with a backend error
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Message> {
        self.rows.lock().unwrap().clone()
    }

    /// Store a row without publishing it, as if written while nobody listened
    pub fn insert_silently(&self, sender_id: &str, content: &str) -> Message {
        let message = self.build(sender_id, MessageDraft::text(content));
        self.rows.lock().unwrap().push(message.clone());
        message
    }

    fn build(&self, sender_id: &str, draft: MessageDraft) -> Message {
        let id = format!("m-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = now_millis();
        Message {
            id,
            conversation_id: self.conversation_id.clone(),
            sender_id: sender_id.to_string(),
            client_ref: draft.client_ref,
            content: draft.content,
            kind: draft.kind,
            media_url: draft.media_url,
            media_duration: draft.media_duration,
            reply_to_id: draft.reply_to_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[async_trait]
impl MessageLog for FakeLog {
    async fn append(
        &self,
        conversation_id: &str,
        sender_id: &str,
        draft: MessageDraft,
    ) -> tidings_store::Result<Message> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        draft.validate()?;
        if conversation_id != self.conversation_id {
            return Err(MessagingError::NotFound(conversation_id.to_string()));
        }

        let delay = *self.response_delay.lock().unwrap();
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tokio::time::sleep(delay).await;
            return Err(backend_failure());
        }

        if let Some(existing) = self.rows.lock().unwrap().iter().find(|m| {
            m.sender_id == sender_id && m.client_ref.is_some() && m.client_ref == draft.client_ref
        }) {
            return Ok(existing.clone());
        }

        let message = self.build(sender_id, draft);
        self.rows.lock().unwrap().push(message.clone());

        let echo = *self.echo.lock().unwrap();
        match echo {
            Echo::BeforeResponse => self.sink.publish(RowChange::MessageInserted(message.clone())),
            Echo::AfterResponse => {
                let sink = self.sink.clone();
                let change = RowChange::MessageInserted(message.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    sink.publish(change);
                });
            }
            Echo::Silent => {}
        }

        tokio::time::sleep(delay).await;
        Ok(message)
    }

    async fn soft_delete(&self, message_id: &str, requester_id: &str) -> tidings_store::Result<Message> {
        let updated = {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| MessagingError::NotFound(message_id.to_string()))?;
            if row.sender_id != requester_id {
                return Err(MessagingError::Unauthorized("not the sender".into()));
            }
            if row.deleted_at.is_some() {
                return Ok(row.clone());
            }
            let now = now_millis();
            row.deleted_at = Some(now);
            row.updated_at = now;
            row.clone()
        };
        self.sink.publish(RowChange::MessageUpdated(updated.clone()));
        Ok(updated)
    }

    async fn page(
        &self,
        _conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: u64,
    ) -> tidings_store::Result<MessagePage> {
        let mut rows: Vec<Message> = self
            .rows()
            .into_iter()
            .filter(|m| !m.is_deleted())
            .filter(|m| before.map_or(true, |b| m.cursor() < *b))
            .collect();
        rows.sort_by_key(|m| m.cursor());

        let limit = limit.max(1) as usize;
        let has_older = rows.len() > limit;
        let messages = rows.split_off(rows.len().saturating_sub(limit));
        let older = if has_older {
            messages.first().map(Message::cursor)
        } else {
            None
        };
        Ok(MessagePage { messages, older })
    }

    async fn changes_since(
        &self,
        _conversation_id: &str,
        since: DateTime<Utc>,
    ) -> tidings_store::Result<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .rows()
            .into_iter()
            .filter(|m| m.updated_at >= since)
            .collect();
        rows.sort_by_key(|m| m.updated_at);
        Ok(rows)
    }

    async fn latest_for(
        &self,
        conversation_ids: &[String],
    ) -> tidings_store::Result<HashMap<String, Message>> {
        let mut latest: HashMap<String, Message> = HashMap::new();
        for row in self.rows().into_iter().filter(|m| !m.is_deleted()) {
            if !conversation_ids.contains(&row.conversation_id) {
                continue;
            }
            let newer = latest
                .get(&row.conversation_id)
                .map_or(true, |last| row.cursor() > last.cursor());
            if newer {
                latest.insert(row.conversation_id.clone(), row);
            }
        }
        Ok(latest)
    }
}

/// Read cursors recording every advance, optionally failing first
#[derive(Default)]
pub struct FakeCursors {
    pub advances: Mutex<Vec<DateTime<Utc>>>,
    pub attempts: AtomicUsize,
    failures: AtomicU32,
    /// Unread counts reported per conversation
    pub unread: Mutex<HashMap<String, u64>>,
}

impl FakeCursors {
    pub fn failing(times: u32) -> Arc<Self> {
        let cursors = Self::default();
        cursors.failures.store(times, Ordering::SeqCst);
        Arc::new(cursors)
    }
}

#[async_trait]
impl ReadCursors for FakeCursors {
    async fn advance(
        &self,
        _conversation_id: &str,
        _user_id: &str,
        at: DateTime<Utc>,
    ) -> tidings_store::Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(backend_failure());
        }
        self.advances.lock().unwrap().push(at);
        Ok(true)
    }

    async fn unread_count(&self, conversation_id: &str, _user_id: &str) -> tidings_store::Result<u64> {
        Ok(self
            .unread
            .lock()
            .unwrap()
            .get(conversation_id)
            .copied()
            .unwrap_or(0))
    }

    async fn unread_counts(
        &self,
        _user_id: &str,
        conversation_ids: &[String],
    ) -> tidings_store::Result<HashMap<String, u64>> {
        let unread = self.unread.lock().unwrap();
        Ok(conversation_ids
            .iter()
            .filter_map(|id| unread.get(id).map(|count| (id.clone(), *count)))
            .collect())
    }
}

/// Conversation catalog over fixed rows
#[derive(Default)]
pub struct FakeCatalog {
    pub conversations: Mutex<Vec<Conversation>>,
    pub participants: Mutex<Vec<Participant>>,
}

impl FakeCatalog {
    /// Add a direct conversation between `a` and `b` updated at `updated_at`
    pub fn add_direct(&self, id: &str, a: &str, b: &str, updated_at: DateTime<Utc>) {
        self.conversations.lock().unwrap().push(Conversation {
            id: id.to_string(),
            namespace: Namespace::general(),
            kind: ConversationKind::Direct,
            name: None,
            pinned: None,
            created_at: updated_at,
            updated_at,
        });
        let mut participants = self.participants.lock().unwrap();
        for user in [a, b] {
            participants.push(Participant {
                id: format!("{}-{}", id, user),
                conversation_id: id.to_string(),
                user_id: user.to_string(),
                role: ParticipantRole::Member,
                joined_at: updated_at,
                last_read_at: updated_at,
            });
        }
    }
}

#[async_trait]
impl ConversationCatalog for FakeCatalog {
    async fn conversation_ids_for(&self, user_id: &str) -> tidings_store::Result<Vec<String>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.conversation_id.clone())
            .collect())
    }

    async fn conversations(&self, ids: &[String]) -> tidings_store::Result<Vec<Conversation>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn participants(
        &self,
        conversation_ids: &[String],
    ) -> tidings_store::Result<Vec<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| conversation_ids.contains(&p.conversation_id))
            .cloned()
            .collect())
    }
}

/// Profile directory whose backend is unreachable
pub struct FailingProfiles;

#[async_trait]
impl ProfileDirectory for FailingProfiles {
    async fn profiles(
        &self,
        _user_ids: &[String],
    ) -> tidings_chat::Result<HashMap<String, Profile>> {
        Err(ChatError::Profile("profile service unreachable".into()))
    }
}

/// Presence repository keeping records in memory
#[derive(Default)]
pub struct FakePresence {
    pub upserts: Mutex<Vec<PresenceStatus>>,
    pub failing: std::sync::atomic::AtomicBool,
}

impl FakePresence {
    pub fn statuses(&self) -> Vec<PresenceStatus> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresenceRepository for FakePresence {
    async fn upsert(
        &self,
        user_id: &str,
        status: PresenceStatus,
    ) -> tidings_store::Result<PresenceRecord> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(backend_failure());
        }
        self.upserts.lock().unwrap().push(status);
        Ok(PresenceRecord {
            user_id: user_id.to_string(),
            status,
            last_seen_at: now_millis(),
        })
    }

    async fn get_many(&self, _user_ids: &[String]) -> tidings_store::Result<Vec<PresenceRecord>> {
        Ok(Vec::new())
    }
}

/// Session wiring over a fake log
pub struct FakeEnv {
    pub hub: Arc<RealtimeHub>,
    pub log: Arc<FakeLog>,
    pub cursors: Arc<FakeCursors>,
    pub blobs: Arc<InMemoryBlobStorage>,
}

impl FakeEnv {
    pub fn new(conversation_id: &str) -> Self {
        Self::with_cursors(conversation_id, Arc::new(FakeCursors::default()))
    }

    pub fn with_cursors(conversation_id: &str, cursors: Arc<FakeCursors>) -> Self {
        let hub = Arc::new(RealtimeHub::new());
        let log = FakeLog::new(conversation_id, hub.clone());
        Self {
            hub,
            log,
            cursors,
            blobs: Arc::new(InMemoryBlobStorage::new()),
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            log: self.log.clone(),
            read_cursors: self.cursors.clone(),
            realtime: self.hub.clone(),
            blobs: self.blobs.clone(),
        }
    }
}

/// Real stores over a temporary database, shared by several messengers
pub struct StoreEnv {
    pub hub: Arc<RealtimeHub>,
    pub stores: MessagingStores,
    pub profiles: Arc<InMemoryProfiles>,
    _db_file: NamedTempFile,
}

impl StoreEnv {
    pub async fn new() -> Self {
        let db_file = NamedTempFile::new().unwrap();
        let hub = Arc::new(RealtimeHub::new());
        let sink: Arc<dyn ChangeSink> = hub.clone();
        let config = StoreConfig {
            db_path: db_file.path().to_path_buf(),
            ..Default::default()
        };
        let stores = MessagingStores::open(config, Some(sink))
            .await
            .expect("Failed to open stores");

        Self {
            hub,
            stores,
            profiles: Arc::new(InMemoryProfiles::new()),
            _db_file: db_file,
        }
    }

    pub fn messenger(&self, user_id: Option<&str>) -> Messenger {
        let identity = match user_id {
            Some(id) => StaticIdentity::signed_in(id),
            None => StaticIdentity::anonymous(),
        };
        let config = MessengerConfig {
            session: session_config(),
            ..Default::default()
        };

        Messenger::new(
            self.stores.clone(),
            self.hub.clone(),
            Arc::new(identity),
            self.profiles.clone(),
            Arc::new(InMemoryBlobStorage::new()),
            config,
        )
    }
}
