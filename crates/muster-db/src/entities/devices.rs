use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub external_id: Uuid,
    pub tenant: String,
    pub hostname: String,
    /// Upper-cased hardware serial; the fleet-wide natural key.
    pub serial: String,
    pub mac_address: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub status: String,
    pub last_seen_at: Option<DateTimeWithTimeZone>,
    pub last_inventory_at: Option<DateTimeWithTimeZone>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTimeWithTimeZone>,
    pub blocked_by: Option<String>,
    pub blocked_at: Option<DateTimeWithTimeZone>,
    pub block_reason: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::device_credentials::Entity")]
    DeviceCredentials,
    #[sea_orm(has_many = "super::commands::Entity")]
    Commands,
}

impl Related<super::device_credentials::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceCredentials.def()
    }
}

impl Related<super::commands::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commands.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
