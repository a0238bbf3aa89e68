//! `SeaORM` implementation of the `AuditRecorder` trait.

use async_trait::async_trait;
use sea_orm::Set;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::{AuditEntry, AuditQuery, Store};
use crate::entities::audit_entries;
use crate::services::audit_service::{AuditRecord, AuditRecorder};

pub struct SeaOrmAuditRecorder {
    store: Store,
}

impl SeaOrmAuditRecorder {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditRecorder for SeaOrmAuditRecorder {
    async fn record(&self, ctx: &RequestContext, record: AuditRecord) -> Option<AuditEntry> {
        let actor = record.actor.unwrap_or(ctx.actor);
        let unit = record.unit.unwrap_or(ctx.unit);
        let (resource_type, resource_id) = record
            .resource
            .map_or((None, None), |r| (Some(r.kind), Some(r.id)));

        let entry = audit_entries::ActiveModel {
            id: Set(Uuid::new_v4()),
            timestamp: Set(chrono::Utc::now()),
            actor_id: Set(actor.map(Into::into)),
            unit_id: Set(unit.map(Into::into)),
            action: Set(record.action),
            resource_type: Set(resource_type),
            resource_id: Set(resource_id),
            changes: Set(Value::Object(record.changes)),
            ip_address: Set(ctx.ip_string()),
            user_agent: Set(ctx.user_agent.clone()),
            detail: Set(record.detail),
        };

        match self.store.append_audit(entry).await {
            Ok(entry) => {
                debug!(
                    action = %entry.action,
                    request_id = %ctx.request_id,
                    "Audit entry recorded"
                );
                Some(entry)
            }
            Err(e) => {
                error!(
                    target: "centergate::security",
                    action = %record.action,
                    request_id = %ctx.request_id,
                    "Failed to write audit entry: {e:#}"
                );
                None
            }
        }
    }

    async fn query(&self, query: &AuditQuery) -> anyhow::Result<Vec<AuditEntry>> {
        self.store.query_audit(query).await
    }
}
