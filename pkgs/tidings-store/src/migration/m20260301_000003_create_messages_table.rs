use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    ConversationId,
    SenderId,
    ClientRef,
    Content,
    Kind,
    MediaUrl,
    MediaDuration,
    ReplyToId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20260301_000003_create_messages_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .col(
                        ColumnDef::new(Messages::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::ConversationId).string().not_null())
                    .col(ColumnDef::new(Messages::SenderId).string().not_null())
                    .col(ColumnDef::new(Messages::ClientRef).string())
                    .col(ColumnDef::new(Messages::Content).text())
                    .col(
                        ColumnDef::new(Messages::Kind)
                            .string()
                            .not_null()
                            .default("text"),
                    )
                    .col(ColumnDef::new(Messages::MediaUrl).string())
                    .col(ColumnDef::new(Messages::MediaDuration).integer())
                    .col(ColumnDef::new(Messages::ReplyToId).string())
                    .col(ColumnDef::new(Messages::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Messages::UpdatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Messages::DeletedAt).big_integer())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_messages_conversation")
                            .from(Messages::Table, Messages::ConversationId)
                            .to(Conversations::Table, Conversations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        let indexes = vec![
            Index::create()
                .name("idx_messages_conversation_created")
                .table(Messages::Table)
                .col(Messages::ConversationId)
                .col(Messages::CreatedAt)
                .col(Messages::Id)
                .to_owned(),
            Index::create()
                .name("idx_messages_conversation_updated")
                .table(Messages::Table)
                .col(Messages::ConversationId)
                .col(Messages::UpdatedAt)
                .to_owned(),
            Index::create()
                .name("idx_messages_conversation_sender_client_ref")
                .table(Messages::Table)
                .col(Messages::ConversationId)
                .col(Messages::SenderId)
                .col(Messages::ClientRef)
                .unique()
                .to_owned(),
        ];

        for idx in indexes {
            manager.create_index(idx).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await
    }
}
