use axum::{
    Extension, Json,
    extract::{Query, State},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::validation::{parse_id, validate_days, validate_limit};
use super::{ApiError, ApiResponse, AppState, AuditEntryDto};
use crate::db::AuditQuery;
use crate::domain::{AuditAction, UnitId};
use crate::services::Actor;

#[derive(Debug, Deserialize, Default)]
pub struct AuditParams {
    pub actor: Option<String>,
    pub unit: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub days: Option<u32>,
    pub limit: Option<u64>,
}

/// GET /audit
///
/// Single-center reviewers only ever see entries of their own centers.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<AuditParams>,
) -> Result<Json<ApiResponse<Vec<AuditEntryDto>>>, ApiError> {
    if !(actor.is_superuser || actor.role.can_review_audit()) {
        return Err(ApiError::forbidden("Audit review requires a reviewer role"));
    }

    let days = validate_days(params.days.unwrap_or(30))?;
    let mut query = AuditQuery {
        limit: Some(validate_limit(params.limit.unwrap_or(100))?),
        since: Some(Utc::now() - Duration::days(i64::from(days))),
        resource_type: params.resource_type,
        resource_id: params.resource_id,
        ..AuditQuery::default()
    };

    if let Some(actor_id) = params.actor.as_deref() {
        query.actor = Some(parse_id("actor", actor_id)?);
    }
    if let Some(action) = params.action.as_deref() {
        let action = action
            .to_uppercase()
            .parse::<AuditAction>()
            .map_err(ApiError::validation)?;
        query.actions = vec![action];
    }
    if let Some(unit) = params.unit.as_deref() {
        let unit = parse_id("unit", unit)?;
        if !state.shared.gate.authorize(&actor, UnitId::from(unit)).await? {
            return Err(ApiError::forbidden("Unit is outside your assignments"));
        }
        query.unit = Some(unit);
    }
    if !actor.is_multi_unit {
        let visible = state
            .shared
            .gate
            .accessible_units(&actor)
            .await?
            .into_iter()
            .map(|center| center.id)
            .collect();
        query.visible_units = Some(visible);
    }

    let entries = state.shared.recorder.query(&query).await?;
    Ok(Json(ApiResponse::success(
        entries.into_iter().map(AuditEntryDto::from).collect(),
    )))
}
