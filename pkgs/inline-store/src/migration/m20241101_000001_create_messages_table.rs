use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    GlobalId,
    RandomId,
    PeerUserId,
    PeerThreadId,
    FromId,
    Date,
    Text,
    Out,
    Status,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20241101_000001_create_messages_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::GlobalId).big_integer())
                    .col(ColumnDef::new(Messages::RandomId).big_integer())
                    .col(ColumnDef::new(Messages::PeerUserId).big_integer())
                    .col(ColumnDef::new(Messages::PeerThreadId).big_integer())
                    .col(ColumnDef::new(Messages::FromId).big_integer().not_null())
                    .col(ColumnDef::new(Messages::Date).big_integer().not_null())
                    .col(ColumnDef::new(Messages::Text).string())
                    .col(
                        ColumnDef::new(Messages::Out)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Messages::Status)
                            .string()
                            .not_null()
                            .default("Sent"),
                    )
                    .to_owned(),
            )
            .await?;

        let indexes = [
            ("idx_messages_user_date", Messages::PeerUserId),
            ("idx_messages_thread_date", Messages::PeerThreadId),
        ];
        for (name, column) in indexes {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Messages::Table)
                        .col(column)
                        .col(Messages::Date)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_global_id")
                    .table(Messages::Table)
                    .col(Messages::GlobalId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_random_id")
                    .table(Messages::Table)
                    .col(Messages::RandomId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await
    }
}
