//! Conversation directory - resolves or creates direct conversations
//!
//! Uniqueness of a direct conversation is enforced by the primary key of
//! `direct_conversation_keys`, not by looking around first: both sides of a
//! simultaneous "start chat" race to claim the same key and the loser adopts
//! the winner's conversation. Databases that predate the key table fall back
//! to intersecting the two users' conversation sets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set, TransactionTrait, TryIntoModel,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::{conversation_participants, conversations, direct_conversation_keys};
use crate::error::{MessagingError, Result};
use crate::models::{
    Conversation, ConversationKind, Namespace, Participant, ParticipantRole, PinnedContext,
    RowChange,
};
use crate::repository::{ChangeSink, ConversationCatalog};

/// Key identifying the direct conversation of an unordered user pair
pub fn direct_key(namespace: &Namespace, a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}:{}", namespace, low, high)
}

/// Conversation directory for one namespace
pub struct ConversationDirectory {
    db: DatabaseConnection,
    namespace: Namespace,
    keyed_creation: AtomicBool,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl ConversationDirectory {
    /// Create a directory over a migrated connection
    pub fn new(db: DatabaseConnection, namespace: Namespace) -> Self {
        Self {
            db,
            namespace,
            keyed_creation: AtomicBool::new(true),
            sink: None,
        }
    }

    /// Publish participant rows of newly created conversations to `sink`
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Whether the storage-level uniqueness path is in use
    pub fn uses_keyed_creation(&self) -> bool {
        self.keyed_creation.load(Ordering::Acquire)
    }

    /// Return the direct conversation between `actor` and `other`, creating
    /// it on first use. A supplied pinned item replaces the stored one.
    pub async fn find_or_create_direct(
        &self,
        actor: &str,
        other: &str,
        pinned: Option<PinnedContext>,
    ) -> Result<String> {
        if actor.trim().is_empty() {
            return Err(MessagingError::AuthRequired);
        }
        if other.trim().is_empty() {
            return Err(MessagingError::InvalidParticipant("peer id is empty".into()));
        }
        if actor == other {
            return Err(MessagingError::InvalidParticipant(
                "cannot start a conversation with yourself".into(),
            ));
        }

        if self.uses_keyed_creation() {
            match self.find_or_create_keyed(actor, other, pinned.as_ref()).await {
                Err(MessagingError::SchemaUnavailable(reason)) => {
                    warn!(
                        "Direct conversation keys unavailable in '{}', using intersection lookup: {}",
                        self.namespace, reason
                    );
                    self.keyed_creation.store(false, Ordering::Release);
                }
                result => return result,
            }
        }

        self.find_or_create_by_intersection(actor, other, pinned.as_ref())
            .await
    }

    async fn find_or_create_keyed(
        &self,
        actor: &str,
        other: &str,
        pinned: Option<&PinnedContext>,
    ) -> Result<String> {
        let key = direct_key(&self.namespace, actor, other);

        if let Some(existing) = self.conversation_for_key(&key).await? {
            if let Some(pinned) = pinned {
                self.refresh_pinned(&existing, pinned).await?;
            }
            debug!("Reusing direct conversation {} for {}", existing, key);
            return Ok(existing);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let conversation_id = Uuid::new_v4().to_string();

        let txn = self.db.begin().await?;

        conversations::Entity::insert(self.new_conversation(&conversation_id, pinned, now))
            .exec_without_returning(&txn)
            .await?;

        let claimed = direct_conversation_keys::Entity::insert(
            direct_conversation_keys::ActiveModel {
                direct_key: Set(key.clone()),
                conversation_id: Set(conversation_id.clone()),
                created_at: Set(now),
            },
        )
        .on_conflict(
            OnConflict::column(direct_conversation_keys::Column::DirectKey)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

        if claimed == 0 {
            // Lost the race: the other side created the conversation first.
            txn.rollback().await?;
            let existing = self
                .conversation_for_key(&key)
                .await?
                .ok_or_else(|| MessagingError::NotFound(format!("direct conversation {}", key)))?;
            if let Some(pinned) = pinned {
                self.refresh_pinned(&existing, pinned).await?;
            }
            debug!("Adopted concurrently created conversation {}", existing);
            return Ok(existing);
        }

        let participants = self.new_participants(&conversation_id, actor, other, now);
        conversation_participants::Entity::insert_many(participants.clone())
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;
        self.publish_participants(participants);

        info!(
            "Created direct conversation {} in '{}'",
            conversation_id, self.namespace
        );
        Ok(conversation_id)
    }

    async fn find_or_create_by_intersection(
        &self,
        actor: &str,
        other: &str,
        pinned: Option<&PinnedContext>,
    ) -> Result<String> {
        let mine: HashSet<String> = self.conversation_ids_for(actor).await?.into_iter().collect();
        let shared: Vec<String> = self
            .conversation_ids_for(other)
            .await?
            .into_iter()
            .filter(|id| mine.contains(id))
            .collect();

        if !shared.is_empty() {
            let candidates = conversations::Entity::find()
                .filter(conversations::Column::Id.is_in(shared))
                .filter(conversations::Column::Kind.eq(ConversationKind::Direct.as_str()))
                .order_by_asc(conversations::Column::CreatedAt)
                .order_by_asc(conversations::Column::Id)
                .all(&self.db)
                .await?;

            if let Some(first) = candidates.first() {
                if candidates.len() > 1 {
                    warn!(
                        "Found {} direct conversations between {} and {}, using oldest {}",
                        candidates.len(),
                        actor,
                        other,
                        first.id
                    );
                }
                if let Some(pinned) = pinned {
                    self.refresh_pinned(&first.id, pinned).await?;
                }
                return Ok(first.id.clone());
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let conversation_id = Uuid::new_v4().to_string();

        conversations::Entity::insert(self.new_conversation(&conversation_id, pinned, now))
            .exec_without_returning(&self.db)
            .await?;

        let participants = self.new_participants(&conversation_id, actor, other, now);
        let inserted = conversation_participants::Entity::insert_many(participants.clone())
            .exec_without_returning(&self.db)
            .await;

        if let Err(e) = inserted {
            warn!(
                "Failed to add participants to {}, removing conversation: {}",
                conversation_id, e
            );
            if let Err(cleanup) = conversations::Entity::delete_by_id(conversation_id.clone())
                .exec(&self.db)
                .await
            {
                error!(
                    "Failed to remove orphaned conversation {}: {}",
                    conversation_id, cleanup
                );
            }
            return Err(e.into());
        }

        self.publish_participants(participants);

        info!(
            "Created direct conversation {} in '{}' without key table",
            conversation_id, self.namespace
        );
        Ok(conversation_id)
    }

    /// Ids of every conversation in this namespace `user_id` participates in
    pub async fn conversation_ids_for(&self, user_id: &str) -> Result<Vec<String>> {
        let ids = conversation_participants::Entity::find()
            .select_only()
            .column(conversation_participants::Column::ConversationId)
            .join(
                JoinType::InnerJoin,
                conversation_participants::Relation::Conversation.def(),
            )
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .filter(conversations::Column::Namespace.eq(self.namespace.as_str()))
            .into_tuple::<String>()
            .all(&self.db)
            .await?;

        Ok(ids)
    }

    /// Get a conversation of this namespace by id
    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        conversations::Entity::find_by_id(conversation_id.to_string())
            .filter(conversations::Column::Namespace.eq(self.namespace.as_str()))
            .one(&self.db)
            .await?
            .map(Conversation::try_from)
            .transpose()
    }

    /// Batch-fetch conversations of this namespace
    pub async fn conversations(&self, ids: &[String]) -> Result<Vec<Conversation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        conversations::Entity::find()
            .filter(conversations::Column::Id.is_in(ids.iter().cloned()))
            .filter(conversations::Column::Namespace.eq(self.namespace.as_str()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(Conversation::try_from)
            .collect()
    }

    /// Batch-fetch the participants of the given conversations
    pub async fn participants(&self, conversation_ids: &[String]) -> Result<Vec<Participant>> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        conversation_participants::Entity::find()
            .filter(
                conversation_participants::Column::ConversationId
                    .is_in(conversation_ids.iter().cloned()),
            )
            .order_by_asc(conversation_participants::Column::JoinedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Participant::try_from)
            .collect()
    }

    async fn conversation_for_key(&self, key: &str) -> Result<Option<String>> {
        let row = direct_conversation_keys::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.conversation_id))
    }

    async fn refresh_pinned(&self, conversation_id: &str, pinned: &PinnedContext) -> Result<()> {
        conversations::Entity::update_many()
            .col_expr(
                conversations::Column::PinnedItemId,
                Expr::value(Some(pinned.item_id.clone())),
            )
            .col_expr(
                conversations::Column::PinnedItemTitle,
                Expr::value(pinned.title.clone()),
            )
            .col_expr(
                conversations::Column::PinnedItemImage,
                Expr::value(pinned.image_url.clone()),
            )
            .col_expr(
                conversations::Column::PinnedItemPrice,
                Expr::value(pinned.price),
            )
            .filter(conversations::Column::Id.eq(conversation_id))
            .exec(&self.db)
            .await?;

        debug!(
            "Pinned item {} on conversation {}",
            pinned.item_id, conversation_id
        );
        Ok(())
    }

    fn publish_participants(&self, rows: Vec<conversation_participants::ActiveModel>) {
        let Some(sink) = &self.sink else {
            return;
        };
        for row in rows {
            match row.try_into_model().map_err(MessagingError::from) {
                Ok(model) => match Participant::try_from(model) {
                    Ok(participant) => sink.publish(RowChange::ParticipantAdded(participant)),
                    Err(e) => warn!("Skipping participant change: {}", e),
                },
                Err(e) => warn!("Skipping participant change: {}", e),
            }
        }
    }

    fn new_conversation(
        &self,
        conversation_id: &str,
        pinned: Option<&PinnedContext>,
        now: i64,
    ) -> conversations::ActiveModel {
        conversations::ActiveModel {
            id: Set(conversation_id.to_string()),
            namespace: Set(self.namespace.as_str().to_string()),
            kind: Set(ConversationKind::Direct.as_str().to_string()),
            name: Set(None),
            pinned_item_id: Set(pinned.map(|p| p.item_id.clone())),
            pinned_item_title: Set(pinned.and_then(|p| p.title.clone())),
            pinned_item_image: Set(pinned.and_then(|p| p.image_url.clone())),
            pinned_item_price: Set(pinned.and_then(|p| p.price)),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }

    fn new_participants(
        &self,
        conversation_id: &str,
        actor: &str,
        other: &str,
        now: i64,
    ) -> Vec<conversation_participants::ActiveModel> {
        [actor, other]
            .into_iter()
            .map(|user_id| conversation_participants::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                conversation_id: Set(conversation_id.to_string()),
                user_id: Set(user_id.to_string()),
                role: Set(ParticipantRole::Member.as_str().to_string()),
                joined_at: Set(now),
                last_read_at: Set(now),
            })
            .collect()
    }
}

#[async_trait]
impl ConversationCatalog for ConversationDirectory {
    async fn conversation_ids_for(&self, user_id: &str) -> Result<Vec<String>> {
        ConversationDirectory::conversation_ids_for(self, user_id).await
    }

    async fn conversations(&self, ids: &[String]) -> Result<Vec<Conversation>> {
        ConversationDirectory::conversations(self, ids).await
    }

    async fn participants(&self, conversation_ids: &[String]) -> Result<Vec<Participant>> {
        ConversationDirectory::participants(self, conversation_ids).await
    }
}
