use sea_orm_migration::prelude::*;

mod m0001_create_devices;
mod m0002_create_device_credentials;
mod m0003_create_pre_registrations;
mod m0004_create_commands;
mod m0005_create_heartbeats;
mod m0006_create_activity_events;
mod m0007_create_retention_policies;
mod m0008_create_admin_users;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_devices::Migration),
            Box::new(m0002_create_device_credentials::Migration),
            Box::new(m0003_create_pre_registrations::Migration),
            Box::new(m0004_create_commands::Migration),
            Box::new(m0005_create_heartbeats::Migration),
            Box::new(m0006_create_activity_events::Migration),
            Box::new(m0007_create_retention_policies::Migration),
            Box::new(m0008_create_admin_users::Migration),
        ]
    }
}
