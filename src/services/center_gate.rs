//! Multi-center access isolation.
//!
//! Every read of center-scoped data goes through [`filter_scoped`] or
//! [`ensure_access`], and every write is preceded by
//! [`CenterAccessGate::authorize`]. Multi-unit administrators pass all
//! checks.

use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

use crate::context::RequestContext;
use crate::db::{Account, AuditEntry, Center, UnitAssignment};
use crate::domain::{AccountId, Role, UnitId};

/// The authenticated principal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub id: AccountId,
    pub login_name: String,
    pub display_name: String,
    pub role: Role,
    pub is_superuser: bool,
    pub is_multi_unit: bool,
    pub two_factor_completed: bool,
    pub emergency: bool,
}

impl Actor {
    #[must_use]
    pub fn from_account(account: &Account, two_factor_completed: bool, emergency: bool) -> Self {
        Self {
            id: AccountId::from(account.id),
            login_name: account.login_name.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            is_superuser: account.is_superuser,
            is_multi_unit: account.is_multi_unit,
            two_factor_completed,
            emergency,
        }
    }
}

/// Errors specific to center access.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AccessError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Anything owned by a center.
pub trait UnitScoped {
    /// `None` for records that belong to no center; those are visible to
    /// every authenticated actor.
    fn owning_unit(&self) -> Option<UnitId>;
}

impl UnitScoped for Center {
    fn owning_unit(&self) -> Option<UnitId> {
        Some(UnitId::from(self.id))
    }
}

impl UnitScoped for UnitAssignment {
    fn owning_unit(&self) -> Option<UnitId> {
        Some(UnitId::from(self.center_id))
    }
}

impl UnitScoped for AuditEntry {
    fn owning_unit(&self) -> Option<UnitId> {
        self.unit_id.map(UnitId::from)
    }
}

#[derive(Debug, Clone)]
pub struct NewCenter {
    pub code: String,
    pub name: String,
    pub capacity: i32,
    pub administrator: Option<AccountId>,
}

/// Domain service trait for center scoping and assignment management.
#[async_trait::async_trait]
pub trait CenterAccessGate: Send + Sync {
    /// The session's center while the actor may still use it, else the
    /// actor's primary center, else none.
    async fn resolve_current_unit(
        &self,
        actor: &Actor,
        session_unit: Option<UnitId>,
    ) -> Result<Option<Center>, AccessError>;

    /// True iff the actor is multi-unit or holds an active assignment to the
    /// active center.
    async fn authorize(&self, actor: &Actor, unit: UnitId) -> Result<bool, AccessError>;

    async fn accessible_units(&self, actor: &Actor) -> Result<Vec<Center>, AccessError>;

    /// Authorizes and audits a change of current center. The caller stores
    /// the returned center in the session.
    async fn switch_unit(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        unit: UnitId,
    ) -> Result<Center, AccessError>;

    async fn create_center(
        &self,
        ctx: &RequestContext,
        center: NewCenter,
    ) -> Result<Center, AccessError>;

    async fn assign(
        &self,
        ctx: &RequestContext,
        account: AccountId,
        unit: UnitId,
        primary: bool,
    ) -> Result<UnitAssignment, AccessError>;

    async fn revoke(
        &self,
        ctx: &RequestContext,
        account: AccountId,
        unit: UnitId,
    ) -> Result<(), AccessError>;
}

/// Keeps the items the actor may see.
pub async fn filter_scoped<T: UnitScoped + Send>(
    gate: &dyn CenterAccessGate,
    actor: &Actor,
    items: Vec<T>,
) -> Result<Vec<T>, AccessError> {
    if actor.is_multi_unit {
        return Ok(items);
    }

    let visible: HashSet<UnitId> = gate
        .accessible_units(actor)
        .await?
        .into_iter()
        .map(|center| UnitId::from(center.id))
        .collect();

    Ok(items
        .into_iter()
        .filter(|item| item.owning_unit().is_none_or(|unit| visible.contains(&unit)))
        .collect())
}

/// Distinguishes a missing resource from one the actor may not touch.
pub async fn ensure_access<T: UnitScoped + Send>(
    gate: &dyn CenterAccessGate,
    actor: &Actor,
    item: Option<T>,
    what: &str,
) -> Result<T, AccessError> {
    let Some(item) = item else {
        return Err(AccessError::NotFound(what.to_string()));
    };
    match item.owning_unit() {
        Some(unit) if !gate.authorize(actor, unit).await? => {
            Err(AccessError::Forbidden(format!("{what} belongs to another center")))
        }
        _ => Ok(item),
    }
}
