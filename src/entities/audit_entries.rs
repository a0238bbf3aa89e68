use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::domain::AuditAction;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "audit_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub timestamp: DateTimeUtc,

    pub actor_id: Option<Uuid>,

    pub unit_id: Option<Uuid>,

    pub action: AuditAction,

    pub resource_type: Option<String>,

    pub resource_id: Option<String>,

    /// Field name to `{"old": .., "new": ..}`.
    pub changes: Json,

    pub ip_address: Option<String>,

    pub user_agent: Option<String>,

    pub detail: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert {
            Ok(self)
        } else {
            Err(DbErr::Custom("audit entries are append-only".to_string()))
        }
    }

    async fn before_delete<C>(self, _db: &C) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Err(DbErr::Custom("audit entries are append-only".to_string()))
    }
}
