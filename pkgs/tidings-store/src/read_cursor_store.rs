//! Read cursor store - per-participant `last_read_at` and unread counts
//!
//! A message counts as unread for a participant when it was sent by someone
//! else, is not deleted, and was created after the participant's
//! `last_read_at`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, Statement,
};
use tracing::debug;

use crate::entities::{conversation_participants, messages};
use crate::error::{MessagingError, Result};
use crate::models::Participant;
use crate::repository::ReadCursors;

#[derive(Debug, FromQueryResult)]
struct UnreadRow {
    conversation_id: String,
    unread: i64,
}

/// Read cursor store
pub struct ReadCursorStore {
    db: DatabaseConnection,
}

impl ReadCursorStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get the participant row of `user_id` in a conversation
    pub async fn participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        conversation_participants::Entity::find()
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .map(Participant::try_from)
            .transpose()
    }
}

#[async_trait]
impl ReadCursors for ReadCursorStore {
    async fn advance(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let at = at.timestamp_millis();

        // Conditional update: concurrent sessions of the same user can only
        // ever move the cursor forward.
        let result = conversation_participants::Entity::update_many()
            .col_expr(conversation_participants::Column::LastReadAt, Expr::value(at))
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .filter(conversation_participants::Column::LastReadAt.lt(at))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            debug!(
                "Advanced read cursor of {} in {} to {}",
                user_id, conversation_id, at
            );
            return Ok(true);
        }

        if self.participant(conversation_id, user_id).await?.is_none() {
            return Err(MessagingError::NotFound(format!(
                "participant {} in {}",
                user_id, conversation_id
            )));
        }
        Ok(false)
    }

    async fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        let participant = conversation_participants::Entity::find()
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                MessagingError::NotFound(format!("participant {} in {}", user_id, conversation_id))
            })?;

        let count = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::SenderId.ne(user_id))
            .filter(messages::Column::DeletedAt.is_null())
            .filter(messages::Column::CreatedAt.gt(participant.last_read_at))
            .count(&self.db)
            .await?;

        Ok(count)
    }

    // One query for all conversations; those without a participant row are absent
    async fn unread_counts(
        &self,
        user_id: &str,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, u64>> {
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; conversation_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT p.conversation_id AS conversation_id, COUNT(m.id) AS unread
            FROM conversation_participants p
            LEFT JOIN messages m
              ON m.conversation_id = p.conversation_id
             AND m.sender_id <> p.user_id
             AND m.deleted_at IS NULL
             AND m.created_at > p.last_read_at
            WHERE p.user_id = ? AND p.conversation_id IN ({})
            GROUP BY p.conversation_id
            "#,
            placeholders
        );

        let mut values = vec![sea_orm::Value::from(user_id.to_string())];
        values.extend(conversation_ids.iter().map(|id| sea_orm::Value::from(id.clone())));

        let rows = UnreadRow::find_by_statement(Statement::from_sql_and_values(
            self.db.get_database_backend(),
            sql,
            values,
        ))
        .all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.conversation_id, row.unread.max(0) as u64))
            .collect())
    }
}
