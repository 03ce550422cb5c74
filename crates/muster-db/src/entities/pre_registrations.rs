use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "pre_registrations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub serial: String,
    pub description: Option<String>,
    pub registered_by: String,
    pub enrolled: bool,
    pub device_id: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub enrolled_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::devices::Entity",
        from = "Column::DeviceId",
        to = "super::devices::Column::Id"
    )]
    Devices,
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Devices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
