use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeviceCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeviceCredentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::DeviceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::TokenHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCredentials::RevokeReason)
                            .string()
                            .null(),
                    )
                    .index(
                        Index::create()
                            .name("idx_device_credentials_token_hash_unique")
                            .table(DeviceCredentials::Table)
                            .col(DeviceCredentials::TokenHash)
                            .unique(),
                    )
                    .index(
                        Index::create()
                            .name("idx_device_credentials_device_id")
                            .table(DeviceCredentials::Table)
                            .col(DeviceCredentials::DeviceId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_credentials_device_id")
                            .from(DeviceCredentials::Table, DeviceCredentials::DeviceId)
                            .to(Devices::Table, Devices::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeviceCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeviceCredentials {
    Table,
    Id,
    DeviceId,
    TokenHash,
    CreatedAt,
    LastUsedAt,
    RevokedAt,
    RevokeReason,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}
