use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Heartbeats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Heartbeats::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Heartbeats::DeviceId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Heartbeats::Tenant)
                            .string()
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(Heartbeats::IpAddress).string().null())
                    .col(ColumnDef::new(Heartbeats::AgentVersion).string().null())
                    .col(
                        ColumnDef::new(Heartbeats::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_heartbeats_received_at")
                            .table(Heartbeats::Table)
                            .col(Heartbeats::ReceivedAt),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_heartbeats_device_id")
                            .from(Heartbeats::Table, Heartbeats::DeviceId)
                            .to(Devices::Table, Devices::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Heartbeats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Heartbeats {
    Table,
    Id,
    DeviceId,
    Tenant,
    IpAddress,
    AgentVersion,
    ReceivedAt,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}
