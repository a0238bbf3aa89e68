use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "centers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub code: String,

    pub name: String,

    pub capacity: i32,

    pub administrator_id: Option<Uuid>,

    pub is_active: bool,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::unit_assignments::Entity")]
    UnitAssignments,
}

impl Related<super::unit_assignments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UnitAssignments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
