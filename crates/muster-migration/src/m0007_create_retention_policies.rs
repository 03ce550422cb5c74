use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RetentionPolicies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RetentionPolicies::Tenant)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RetentionPolicies::HeartbeatRetentionDays)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RetentionPolicies::ActivityRetentionDays)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RetentionPolicies::IpAnonymizeAfterDays)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RetentionPolicies::UserAnonymizeAfterDays)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RetentionPolicies::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RetentionPolicies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RetentionPolicies {
    Table,
    Tenant,
    HeartbeatRetentionDays,
    ActivityRetentionDays,
    IpAnonymizeAfterDays,
    UserAnonymizeAfterDays,
    UpdatedAt,
}
