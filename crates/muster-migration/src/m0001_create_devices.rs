use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Devices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Devices::ExternalId).uuid().not_null())
                    .col(
                        ColumnDef::new(Devices::Tenant)
                            .string()
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(Devices::Hostname).string().not_null())
                    .col(ColumnDef::new(Devices::Serial).string().not_null())
                    .col(ColumnDef::new(Devices::MacAddress).string().null())
                    .col(ColumnDef::new(Devices::OsName).string().null())
                    .col(ColumnDef::new(Devices::OsVersion).string().null())
                    .col(
                        ColumnDef::new(Devices::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Devices::LastSeenAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Devices::LastInventoryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Devices::ApprovedBy).string().null())
                    .col(
                        ColumnDef::new(Devices::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Devices::BlockedBy).string().null())
                    .col(
                        ColumnDef::new(Devices::BlockedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Devices::BlockReason).string().null())
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Devices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_devices_serial_unique")
                            .table(Devices::Table)
                            .col(Devices::Serial)
                            .unique(),
                    )
                    .index(
                        Index::create()
                            .name("idx_devices_external_id_unique")
                            .table(Devices::Table)
                            .col(Devices::ExternalId)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
    ExternalId,
    Tenant,
    Hostname,
    Serial,
    MacAddress,
    OsName,
    OsVersion,
    Status,
    LastSeenAt,
    LastInventoryAt,
    ApprovedBy,
    ApprovedAt,
    BlockedBy,
    BlockedAt,
    BlockReason,
    CreatedAt,
    UpdatedAt,
}
