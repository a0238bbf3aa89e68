use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::domain::AuditAction;
use crate::entities::audit_entries;

/// Filter over the audit trail. Every set field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<Uuid>,
    pub unit: Option<Uuid>,
    /// Restricts results to these units; entries without a unit are excluded.
    pub visible_units: Option<Vec<Uuid>>,
    pub actions: Vec<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// `None` returns every match.
    pub limit: Option<u64>,
}

/// Read and append access to the audit trail. There is no update or delete.
pub struct AuditRepository {
    conn: DatabaseConnection,
}

impl AuditRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn append(&self, entry: audit_entries::ActiveModel) -> Result<audit_entries::Model> {
        entry
            .insert(&self.conn)
            .await
            .context("Failed to append audit entry")
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<audit_entries::Model>> {
        let mut condition = Condition::all();

        if let Some(actor) = query.actor {
            condition = condition.add(audit_entries::Column::ActorId.eq(actor));
        }
        if let Some(unit) = query.unit {
            condition = condition.add(audit_entries::Column::UnitId.eq(unit));
        }
        if let Some(units) = &query.visible_units {
            condition = condition.add(audit_entries::Column::UnitId.is_in(units.iter().copied()));
        }
        if !query.actions.is_empty() {
            condition =
                condition.add(audit_entries::Column::Action.is_in(query.actions.iter().copied()));
        }
        if let Some(resource_type) = &query.resource_type {
            condition = condition.add(audit_entries::Column::ResourceType.eq(resource_type.as_str()));
        }
        if let Some(resource_id) = &query.resource_id {
            condition = condition.add(audit_entries::Column::ResourceId.eq(resource_id.as_str()));
        }
        if let Some(since) = query.since {
            condition = condition.add(audit_entries::Column::Timestamp.gte(since));
        }

        let mut select = audit_entries::Entity::find()
            .filter(condition)
            .order_by_desc(audit_entries::Column::Timestamp);
        if let Some(limit) = query.limit {
            select = select.limit(limit);
        }

        select
            .all(&self.conn)
            .await
            .context("Failed to query audit entries")
    }
}
