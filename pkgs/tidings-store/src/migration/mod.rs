//! Sea-ORM migrations for the tidings-store database schema

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_conversations_table;
mod m20260301_000002_create_conversation_participants_table;
mod m20260301_000003_create_messages_table;
mod m20260301_000004_create_presence_table;
mod m20260315_000001_create_direct_conversation_keys_table;

pub struct Migrator;

/// Number of migrations that make up the schema before direct keys were
/// introduced. Databases at this version only support the intersection
/// lookup for direct conversations.
pub const LEGACY_SCHEMA_MIGRATIONS: u32 = 4;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_conversations_table::Migration),
            Box::new(m20260301_000002_create_conversation_participants_table::Migration),
            Box::new(m20260301_000003_create_messages_table::Migration),
            Box::new(m20260301_000004_create_presence_table::Migration),
            Box::new(m20260315_000001_create_direct_conversation_keys_table::Migration),
        ]
    }
}
