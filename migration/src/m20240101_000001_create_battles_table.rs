use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Battles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Battles::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Battles::Mode).string().not_null())
                    .col(ColumnDef::new(Battles::Status).string().not_null())
                    // Full battle document as JSON; mode and status are copied out for filtering
                    .col(ColumnDef::new(Battles::Document).text().not_null())
                    .col(
                        ColumnDef::new(Battles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Battles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Lobby listing filters on status and mode
        manager
            .create_index(
                Index::create()
                    .name("idx_battles_status_mode")
                    .table(Battles::Table)
                    .col(Battles::Status)
                    .col(Battles::Mode)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_battles_created_at")
                    .table(Battles::Table)
                    .col(Battles::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Battles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Battles {
    Table,
    Id,
    Mode,
    Status,
    Document,
    CreatedAt,
    UpdatedAt,
}
