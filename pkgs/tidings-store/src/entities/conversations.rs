//! Conversation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub namespace: String, // tenant the conversation belongs to, e.g. "general" or "marketplace"
    pub kind: String,      // "direct" or "group"
    pub name: Option<String>,
    pub pinned_item_id: Option<String>,
    pub pinned_item_title: Option<String>,
    pub pinned_item_image: Option<String>,
    pub pinned_item_price: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64, // bumped on every send, drives list ordering
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_participants::Entity")]
    Participants,
    #[sea_orm(has_many = "super::messages::Entity")]
    Messages,
}

impl Related<super::conversation_participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
