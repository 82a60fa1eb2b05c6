//! Message store - append-only message log with soft delete and
//! cursor-based paging

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{conversation_participants, conversations, messages};
use crate::error::{MessagingError, Result};
use crate::models::{
    Message, MessageCursor, MessageDraft, MessageKind, MessagePage, Namespace, RowChange,
};
use crate::repository::{ChangeSink, MessageLog};

/// Message store for one namespace
pub struct MessageStore {
    db: DatabaseConnection,
    namespace: Namespace,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl MessageStore {
    /// Create a message store over a migrated connection
    pub fn new(db: DatabaseConnection, namespace: Namespace) -> Self {
        Self {
            db,
            namespace,
            sink: None,
        }
    }

    /// Publish committed inserts and soft deletes to `sink`
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Get message by ID
    pub async fn get(&self, message_id: &str) -> Result<Option<Message>> {
        messages::Entity::find_by_id(message_id.to_string())
            .one(&self.db)
            .await?
            .map(Message::try_from)
            .transpose()
    }

    async fn ensure_conversation(&self, conversation_id: &str) -> Result<()> {
        let count = conversations::Entity::find()
            .filter(conversations::Column::Id.eq(conversation_id))
            .filter(conversations::Column::Namespace.eq(self.namespace.as_str()))
            .count(&self.db)
            .await?;

        if count == 0 {
            return Err(MessagingError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    async fn ensure_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let count = conversation_participants::Entity::find()
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .count(&self.db)
            .await?;

        if count == 0 {
            return Err(MessagingError::Unauthorized(format!(
                "{} is not a participant of {}",
                user_id, conversation_id
            )));
        }
        Ok(())
    }

    async fn find_by_client_ref(
        &self,
        conversation_id: &str,
        sender_id: &str,
        client_ref: &str,
    ) -> Result<Option<Message>> {
        messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::SenderId.eq(sender_id))
            .filter(messages::Column::ClientRef.eq(client_ref))
            .one(&self.db)
            .await?
            .map(Message::try_from)
            .transpose()
    }

    fn publish(&self, change: RowChange) {
        if let Some(sink) = &self.sink {
            sink.publish(change);
        }
    }
}

#[async_trait]
impl MessageLog for MessageStore {
    async fn append(
        &self,
        conversation_id: &str,
        sender_id: &str,
        draft: MessageDraft,
    ) -> Result<Message> {
        draft.validate()?;
        self.ensure_conversation(conversation_id).await?;
        self.ensure_participant(conversation_id, sender_id).await?;

        if let Some(client_ref) = draft.client_ref.as_deref() {
            if let Some(existing) = self.find_by_client_ref(conversation_id, sender_id, client_ref).await? {
                debug!(
                    "Message with client ref {} already stored as {}",
                    client_ref, existing.id
                );
                return Ok(existing);
            }
        }

        if let Some(reply_to_id) = draft.reply_to_id.as_deref() {
            let target = messages::Entity::find_by_id(reply_to_id.to_string())
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .count(&self.db)
                .await?;
            if target == 0 {
                return Err(MessagingError::NotFound(format!(
                    "reply target {}",
                    reply_to_id
                )));
            }
        }

        let content = match draft.kind {
            MessageKind::Text => draft.content.map(|c| c.trim().to_string()),
            _ => draft.content.filter(|c| !c.trim().is_empty()),
        };

        let now = Utc::now().timestamp_millis();
        let row = messages::Model {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            client_ref: draft.client_ref.clone(),
            content,
            kind: draft.kind.as_str().to_string(),
            media_url: draft.media_url,
            media_duration: draft.media_duration,
            reply_to_id: draft.reply_to_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let txn = self.db.begin().await?;

        let inserted = messages::Entity::insert(messages::ActiveModel {
            id: Set(row.id.clone()),
            conversation_id: Set(row.conversation_id.clone()),
            sender_id: Set(row.sender_id.clone()),
            client_ref: Set(row.client_ref.clone()),
            content: Set(row.content.clone()),
            kind: Set(row.kind.clone()),
            media_url: Set(row.media_url.clone()),
            media_duration: Set(row.media_duration),
            reply_to_id: Set(row.reply_to_id.clone()),
            created_at: Set(row.created_at),
            updated_at: Set(row.updated_at),
            deleted_at: Set(None),
        })
        .exec_without_returning(&txn)
        .await;

        if let Err(e) = inserted {
            txn.rollback().await?;
            // A concurrent append with the same correlation id won the insert.
            if let (Some(SqlErr::UniqueConstraintViolation(_)), Some(client_ref)) =
                (e.sql_err(), draft.client_ref.as_deref())
            {
                if let Some(existing) = self.find_by_client_ref(conversation_id, sender_id, client_ref).await? {
                    return Ok(existing);
                }
            }
            return Err(e.into());
        }

        conversations::Entity::update_many()
            .col_expr(conversations::Column::UpdatedAt, Expr::value(now))
            .filter(conversations::Column::Id.eq(conversation_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        let message = Message::try_from(row)?;
        debug!(
            "Stored message {} in conversation {}",
            message.id, conversation_id
        );
        self.publish(RowChange::MessageInserted(message.clone()));
        Ok(message)
    }

    async fn soft_delete(&self, message_id: &str, requester_id: &str) -> Result<Message> {
        let row = messages::Entity::find_by_id(message_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("message {}", message_id)))?;

        self.ensure_conversation(&row.conversation_id).await?;

        if row.sender_id != requester_id {
            return Err(MessagingError::Unauthorized(
                "only the sender may delete a message".into(),
            ));
        }

        if row.deleted_at.is_some() {
            debug!("Message {} already deleted", message_id);
            return Message::try_from(row);
        }

        let now = Utc::now().timestamp_millis();
        let result = messages::Entity::update_many()
            .col_expr(messages::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(messages::Column::UpdatedAt, Expr::value(now))
            .filter(messages::Column::Id.eq(message_id))
            .filter(messages::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await?;

        let message = self
            .get(message_id)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("message {}", message_id)))?;

        if result.rows_affected > 0 {
            info!("Soft-deleted message {}", message_id);
            self.publish(RowChange::MessageUpdated(message.clone()));
        }
        Ok(message)
    }

    async fn page(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: u64,
    ) -> Result<MessagePage> {
        self.ensure_conversation(conversation_id).await?;
        let limit = limit.max(1);

        let mut query = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::DeletedAt.is_null());

        if let Some(cursor) = before {
            let created_at = cursor.created_at.timestamp_millis();
            query = query.filter(
                Condition::any()
                    .add(messages::Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(messages::Column::CreatedAt.eq(created_at))
                            .add(messages::Column::Id.lt(cursor.id.clone())),
                    ),
            );
        }

        let mut rows = query
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Id)
            .limit(limit + 1)
            .all(&self.db)
            .await?;

        let has_older = rows.len() as u64 > limit;
        rows.truncate(limit as usize);
        rows.reverse();

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>>>()?;
        let older = if has_older {
            messages.first().map(Message::cursor)
        } else {
            None
        };

        debug!(
            "Loaded {} messages from conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(MessagePage { messages, older })
    }

    async fn changes_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        self.ensure_conversation(conversation_id).await?;

        messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::UpdatedAt.gte(since.timestamp_millis()))
            .order_by_asc(messages::Column::UpdatedAt)
            .order_by_asc(messages::Column::CreatedAt)
            .order_by_asc(messages::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }

    async fn latest_for(&self, conversation_ids: &[String]) -> Result<HashMap<String, Message>> {
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; conversation_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT m.* FROM messages m
            WHERE m.deleted_at IS NULL
              AND m.conversation_id IN ({})
              AND NOT EXISTS (
                SELECT 1 FROM messages n
                WHERE n.conversation_id = m.conversation_id
                  AND n.deleted_at IS NULL
                  AND (n.created_at > m.created_at
                       OR (n.created_at = m.created_at AND n.id > m.id))
              )
            "#,
            placeholders
        );
        let values = conversation_ids
            .iter()
            .map(|id| sea_orm::Value::from(id.clone()));
        let statement =
            Statement::from_sql_and_values(self.db.get_database_backend(), sql, values);

        let rows = messages::Entity::find()
            .from_raw_sql(statement)
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| Message::try_from(row).map(|m| (m.conversation_id.clone(), m)))
            .collect()
    }
}
