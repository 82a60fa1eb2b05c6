use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::ConnectionTrait;

#[derive(DeriveIden)]
enum DirectConversationKeys {
    Table,
    DirectKey,
    ConversationId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20260315_000001_create_direct_conversation_keys_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DirectConversationKeys::Table)
                    .col(
                        ColumnDef::new(DirectConversationKeys::DirectKey)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DirectConversationKeys::ConversationId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(DirectConversationKeys::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_direct_conversation_keys_conversation")
                            .from(
                                DirectConversationKeys::Table,
                                DirectConversationKeys::ConversationId,
                            )
                            .to(Conversations::Table, Conversations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Conversations created by the intersection lookup get their key
        // now; where a pair already has several, the oldest keeps it.
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                INSERT OR IGNORE INTO direct_conversation_keys (direct_key, conversation_id, created_at)
                SELECT c.namespace || ':' || MIN(p.user_id) || ':' || MAX(p.user_id),
                       c.id,
                       c.created_at
                FROM conversations c
                JOIN conversation_participants p ON p.conversation_id = c.id
                WHERE c.kind = 'direct'
                GROUP BY c.id
                HAVING COUNT(DISTINCT p.user_id) = 2
                ORDER BY c.created_at, c.id
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(DirectConversationKeys::Table)
                    .to_owned(),
            )
            .await
    }
}
