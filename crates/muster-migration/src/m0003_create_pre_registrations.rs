use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PreRegistrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PreRegistrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PreRegistrations::Serial).string().not_null())
                    .col(ColumnDef::new(PreRegistrations::Description).string().null())
                    .col(
                        ColumnDef::new(PreRegistrations::RegisteredBy)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PreRegistrations::Enrolled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PreRegistrations::DeviceId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PreRegistrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PreRegistrations::EnrolledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .index(
                        Index::create()
                            .name("idx_pre_registrations_serial")
                            .table(PreRegistrations::Table)
                            .col(PreRegistrations::Serial),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PreRegistrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PreRegistrations {
    Table,
    Id,
    Serial,
    Description,
    RegisteredBy,
    Enrolled,
    DeviceId,
    CreatedAt,
    EnrolledAt,
}
