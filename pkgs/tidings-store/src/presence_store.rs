//! Presence store - last heartbeat per user
//!
//! Records are advisory. Nothing expires them server-side, so readers have
//! to judge staleness from `last_seen_at` themselves.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::debug;

use crate::entities::presence;
use crate::error::Result;
use crate::models::{now_millis, PresenceRecord, PresenceStatus, RowChange};
use crate::repository::{ChangeSink, PresenceRepository};

/// Presence store
pub struct PresenceStore {
    db: DatabaseConnection,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl PresenceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, sink: None }
    }

    /// Publish every upsert to `sink`
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Get the presence record of a single user
    pub async fn get(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        presence::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?
            .map(PresenceRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl PresenceRepository for PresenceStore {
    async fn upsert(&self, user_id: &str, status: PresenceStatus) -> Result<PresenceRecord> {
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            status,
            last_seen_at: now_millis(),
        };

        presence::Entity::insert(presence::ActiveModel {
            user_id: Set(record.user_id.clone()),
            status: Set(status.as_str().to_string()),
            last_seen_at: Set(record.last_seen_at.timestamp_millis()),
        })
        .on_conflict(
            OnConflict::column(presence::Column::UserId)
                .update_columns([presence::Column::Status, presence::Column::LastSeenAt])
                .to_owned(),
        )
        .exec_without_returning(&self.db)
        .await?;

        debug!("Presence of {} is now {}", user_id, status);
        if let Some(sink) = &self.sink {
            sink.publish(RowChange::PresenceUpserted(record.clone()));
        }
        Ok(record)
    }

    async fn get_many(&self, user_ids: &[String]) -> Result<Vec<PresenceRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        presence::Entity::find()
            .filter(presence::Column::UserId.is_in(user_ids.iter().cloned()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(PresenceRecord::try_from)
            .collect()
    }
}
