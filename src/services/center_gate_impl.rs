//! `SeaORM` implementation of the `CenterAccessGate` trait.

use async_trait::async_trait;
use sea_orm::Set;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::{Center, Store, UnitAssignment};
use crate::domain::validation::normalize_center_code;
use crate::domain::{AccountId, AuditAction, UnitId};
use crate::entities::centers;
use crate::services::audit_service::{
    AuditRecord, AuditRecorder, ResourceRef, audit_created, audit_deleted,
};
use crate::services::center_gate::{AccessError, Actor, CenterAccessGate, NewCenter};

pub struct SeaOrmCenterGate {
    store: Store,
    recorder: Arc<dyn AuditRecorder>,
}

impl SeaOrmCenterGate {
    #[must_use]
    pub fn new(store: Store, recorder: Arc<dyn AuditRecorder>) -> Self {
        Self { store, recorder }
    }

    async fn active_center(&self, unit: UnitId) -> Result<Option<Center>, AccessError> {
        Ok(self
            .store
            .get_center(unit.value())
            .await?
            .filter(|center| center.is_active))
    }
}

#[async_trait]
impl CenterAccessGate for SeaOrmCenterGate {
    async fn resolve_current_unit(
        &self,
        actor: &Actor,
        session_unit: Option<UnitId>,
    ) -> Result<Option<Center>, AccessError> {
        if let Some(unit) = session_unit {
            if let Some(center) = self.active_center(unit).await?
                && self.authorize(actor, unit).await?
            {
                return Ok(Some(center));
            }
            debug!(account_id = %actor.id, unit = %unit, "Session center no longer accessible");
        }

        Ok(self.store.primary_center(actor.id.value()).await?)
    }

    async fn authorize(&self, actor: &Actor, unit: UnitId) -> Result<bool, AccessError> {
        if actor.is_multi_unit {
            return Ok(true);
        }
        Ok(self
            .store
            .is_assigned(actor.id.value(), unit.value())
            .await?)
    }

    async fn accessible_units(&self, actor: &Actor) -> Result<Vec<Center>, AccessError> {
        if actor.is_multi_unit {
            return Ok(self.store.list_active_centers().await?);
        }
        Ok(self.store.centers_for_account(actor.id.value()).await?)
    }

    async fn switch_unit(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        unit: UnitId,
    ) -> Result<Center, AccessError> {
        let Some(center) = self.active_center(unit).await? else {
            return Err(AccessError::NotFound(format!("center {unit}")));
        };
        if !self.authorize(actor, unit).await? {
            warn!(
                target: "centergate::security",
                account_id = %actor.id,
                unit = %unit,
                "Denied switch to unassigned center"
            );
            return Err(AccessError::Forbidden(format!("center {}", center.code)));
        }

        let record = AuditRecord::new(AuditAction::Update)
            .unit(Some(unit))
            .resource(ResourceRef::new("session", actor.id))
            .detail(json!({
                "event": "center_switched",
                "from": ctx.unit,
                "to": unit,
                "center_code": center.code,
            }));
        self.recorder.record(ctx, record).await;

        Ok(center)
    }

    async fn create_center(
        &self,
        ctx: &RequestContext,
        center: NewCenter,
    ) -> Result<Center, AccessError> {
        let code = normalize_center_code(&center.code).map_err(AccessError::Invalid)?;
        let name = center.name.trim();
        if name.is_empty() {
            return Err(AccessError::Invalid("Center name is required".to_string()));
        }
        if center.capacity < 0 {
            return Err(AccessError::Invalid("Capacity cannot be negative".to_string()));
        }
        if self.store.get_center_by_code(&code).await?.is_some() {
            return Err(AccessError::Invalid(format!("Center code {code} already exists")));
        }

        let created = self
            .store
            .insert_center(centers::ActiveModel {
                id: Set(Uuid::new_v4()),
                code: Set(code),
                name: Set(name.to_string()),
                capacity: Set(center.capacity),
                administrator_id: Set(center.administrator.map(Into::into)),
                is_active: Set(true),
                created_at: Set(ctx.timestamp),
            })
            .await?;

        audit_created(self.recorder.as_ref(), ctx, &created).await;
        info!(center_id = %created.id, code = %created.code, "Center created");
        Ok(created)
    }

    async fn assign(
        &self,
        ctx: &RequestContext,
        account: AccountId,
        unit: UnitId,
        primary: bool,
    ) -> Result<UnitAssignment, AccessError> {
        if self.store.get_account(account.value()).await?.is_none() {
            return Err(AccessError::NotFound(format!("account {account}")));
        }
        let Some(center) = self.active_center(unit).await? else {
            return Err(AccessError::NotFound(format!("center {unit}")));
        };

        let assignment = self
            .store
            .assign_unit(
                account.value(),
                center.id,
                primary,
                ctx.actor.map(Into::into),
                ctx.timestamp,
            )
            .await?;

        audit_created(self.recorder.as_ref(), ctx, &assignment).await;
        info!(
            account_id = %account,
            center = %center.code,
            primary,
            "Center assigned"
        );
        Ok(assignment)
    }

    async fn revoke(
        &self,
        ctx: &RequestContext,
        account: AccountId,
        unit: UnitId,
    ) -> Result<(), AccessError> {
        let existing = self
            .store
            .assignments_for_account(account.value())
            .await?
            .into_iter()
            .find(|a| a.center_id == unit.value() && a.is_active);
        let Some(existing) = existing else {
            return Err(AccessError::NotFound(format!(
                "assignment of {account} to {unit}"
            )));
        };

        if self.store.revoke_unit(account.value(), unit.value()).await? {
            audit_deleted(self.recorder.as_ref(), ctx, &existing).await;
            info!(account_id = %account, unit = %unit, "Center assignment revoked");
        }
        Ok(())
    }
}
