use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commands::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Commands::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Commands::DeviceId).big_integer().not_null())
                    .col(ColumnDef::new(Commands::CommandType).string().not_null())
                    .col(ColumnDef::new(Commands::Payload).json_binary().not_null())
                    .col(ColumnDef::new(Commands::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Commands::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Commands::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commands::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Commands::ResultPayload).json_binary().null())
                    .col(
                        ColumnDef::new(Commands::ReportedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .index(
                        Index::create()
                            .name("idx_commands_device_id_status")
                            .table(Commands::Table)
                            .col(Commands::DeviceId)
                            .col(Commands::Status),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commands_device_id")
                            .from(Commands::Table, Commands::DeviceId)
                            .to(Devices::Table, Devices::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Commands::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Commands {
    Table,
    Id,
    DeviceId,
    CommandType,
    Payload,
    CreatedBy,
    CreatedAt,
    ExpiresAt,
    Status,
    ResultPayload,
    ReportedAt,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}
