use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ActivityEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ActivityEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ActivityEvents::Tenant)
                            .string()
                            .not_null()
                            .default("default"),
                    )
                    .col(
                        ColumnDef::new(ActivityEvents::DeviceId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(ActivityEvents::Actor).string().null())
                    .col(ColumnDef::new(ActivityEvents::IpAddress).string().null())
                    .col(ColumnDef::new(ActivityEvents::Action).string().not_null())
                    .col(ColumnDef::new(ActivityEvents::Meta).json_binary().null())
                    .col(
                        ColumnDef::new(ActivityEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_activity_events_created_at")
                            .table(ActivityEvents::Table)
                            .col(ActivityEvents::CreatedAt),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ActivityEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ActivityEvents {
    Table,
    Id,
    Tenant,
    DeviceId,
    Actor,
    IpAddress,
    Action,
    Meta,
    CreatedAt,
}
